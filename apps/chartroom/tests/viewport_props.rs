use chartroom_client_core::viewport::{
    CanvasSize, DEFAULT_ZOOM_FACTOR, MAX_SPAN, Point, Viewport, Window,
};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

const CASES: usize = 500;

fn close(a: f64, b: f64, tolerance: f64) -> bool {
    (a - b).abs() <= tolerance * a.abs().max(b.abs()).max(1.0)
}

fn random_viewport(rng: &mut StdRng) -> Viewport {
    let x0 = rng.gen_range(-5_000.0..5_000.0);
    let y0 = rng.gen_range(-5_000.0..5_000.0);
    let width = rng.gen_range(1.0..4_000.0);
    let height = rng.gen_range(1.0..4_000.0);
    let canvas = CanvasSize::new(rng.gen_range(50.0..2_000.0), rng.gen_range(50.0..2_000.0));
    Viewport::new(Window::new(x0, y0, x0 + width, y0 + height), canvas)
}

fn random_canvas_point(rng: &mut StdRng, viewport: &Viewport) -> Point {
    let canvas = viewport.canvas();
    Point::new(
        rng.gen_range(0.0..canvas.width),
        rng.gen_range(0.0..canvas.height),
    )
}

fn assert_valid(viewport: &Viewport) {
    let window = viewport.window();
    assert!(
        [window.x0, window.y0, window.x1, window.y1]
            .iter()
            .all(|v| v.is_finite()),
        "non-finite window {window:?}"
    );
    assert!(window.x1 > window.x0, "degenerate window {window:?}");
    assert!(window.y1 > window.y0, "degenerate window {window:?}");
    assert!(window.width() >= viewport.min_span() * (1.0 - 1e-9));
    assert!(window.height() >= viewport.min_span() * (1.0 - 1e-9));
    let widest = MAX_SPAN * (1.0 + 1e-9);
    assert!(window.width() <= widest && window.height() <= widest);
    let (sx, sy) = viewport.scale();
    assert!(sx.is_finite() && sy.is_finite() && sx > 0.0 && sy > 0.0);
}

#[test]
fn random_gestures_keep_the_window_valid() {
    let mut rng = StdRng::seed_from_u64(0x5eed_c4a7);
    for _ in 0..CASES {
        let mut viewport = random_viewport(&mut rng);
        for _ in 0..40 {
            match rng.gen_range(0..7) {
                0 => viewport.pan(rng.gen_range(-500.0..500.0), rng.gen_range(-500.0..500.0)),
                1 => {
                    let anchor = random_canvas_point(&mut rng, &viewport);
                    let zoom_in = rng.gen_bool(0.7);
                    viewport.zoom(anchor, zoom_in, rng.gen_range(1.01..2.0));
                }
                2 => {
                    viewport.begin_pinch();
                    for _ in 0..rng.gen_range(1..6) {
                        viewport.pinch(
                            rng.gen_range(0.25..8.0),
                            Point::new(rng.gen_range(-300.0..300.0), rng.gen_range(-300.0..300.0)),
                        );
                    }
                    viewport.end_pinch();
                }
                3 => viewport.resize(CanvasSize::new(
                    rng.gen_range(-10.0..2_500.0),
                    rng.gen_range(-10.0..2_500.0),
                )),
                4 => {
                    let anchor = random_canvas_point(&mut rng, &viewport);
                    for _ in 0..rng.gen_range(50..400) {
                        viewport.zoom(anchor, false, 2.0);
                    }
                }
                5 => {
                    let magnitude = [1e12, 1e200, f64::MAX][rng.gen_range(0..3)];
                    let sign = if rng.gen_bool(0.5) { 1.0 } else { -1.0 };
                    viewport.pan(sign * magnitude, -sign * magnitude);
                }
                _ => viewport.pan(f64::NAN, f64::INFINITY),
            }
            assert_valid(&viewport);
        }
    }
}

#[test]
fn canvas_and_image_coordinates_round_trip() {
    let mut rng = StdRng::seed_from_u64(17);
    for _ in 0..CASES {
        let viewport = random_viewport(&mut rng);
        let point = random_canvas_point(&mut rng, &viewport);
        let back = viewport.image_to_canvas(viewport.canvas_to_image(point));
        assert!(close(back.x, point.x, 1e-9), "{point:?} -> {back:?}");
        assert!(close(back.y, point.y, 1e-9), "{point:?} -> {back:?}");
    }
}

#[test]
fn zoom_keeps_the_anchor_under_the_cursor() {
    let mut rng = StdRng::seed_from_u64(99);
    for _ in 0..CASES {
        let mut viewport = random_viewport(&mut rng);
        let anchor = random_canvas_point(&mut rng, &viewport);
        let before = viewport.canvas_to_image(anchor);
        viewport.zoom(anchor, rng.gen_bool(0.5), DEFAULT_ZOOM_FACTOR);
        let after = viewport.canvas_to_image(anchor);
        assert!(close(before.x, after.x, 1e-9), "{before:?} vs {after:?}");
        assert!(close(before.y, after.y, 1e-9), "{before:?} vs {after:?}");
    }
}

#[test]
fn zoom_in_then_out_restores_the_window() {
    let mut rng = StdRng::seed_from_u64(4242);
    for _ in 0..CASES {
        let mut viewport = random_viewport(&mut rng);
        let original = viewport.window();
        let anchor = random_canvas_point(&mut rng, &viewport);
        let factor = rng.gen_range(1.05..2.0);
        viewport.zoom(anchor, true, factor);
        viewport.zoom(anchor, false, factor);
        let restored = viewport.window();
        for (a, b) in [
            (original.x0, restored.x0),
            (original.y0, restored.y0),
            (original.x1, restored.x1),
            (original.y1, restored.y1),
        ] {
            assert!(close(a, b, 1e-9), "{original:?} vs {restored:?}");
        }
    }
}

#[test]
fn pan_is_undone_by_the_opposite_drag() {
    let mut rng = StdRng::seed_from_u64(7);
    for _ in 0..CASES {
        let mut viewport = random_viewport(&mut rng);
        let original = viewport.window();
        let (dx, dy) = (rng.gen_range(-800.0..800.0), rng.gen_range(-800.0..800.0));
        viewport.pan(dx, dy);
        assert!(close(viewport.window().width(), original.width(), 1e-9));
        viewport.pan(-dx, -dy);
        let restored = viewport.window();
        assert!(close(restored.x0, original.x0, 1e-9));
        assert!(close(restored.y1, original.y1, 1e-9));
    }
}

#[test]
fn pinch_is_relative_to_the_gesture_start() {
    let mut rng = StdRng::seed_from_u64(31337);
    for _ in 0..CASES {
        let mut viewport = random_viewport(&mut rng);
        let original = viewport.window();
        viewport.begin_pinch();
        viewport.pinch(rng.gen_range(0.2..5.0), Point::new(40.0, -25.0));
        viewport.pinch(1.0, Point::new(0.0, 0.0));
        let restored = viewport.window();
        viewport.end_pinch();
        assert!(close(restored.x0, original.x0, 1e-9), "{original:?} vs {restored:?}");
        assert!(close(restored.y0, original.y0, 1e-9), "{original:?} vs {restored:?}");
        assert!(close(restored.x1, original.x1, 1e-9), "{original:?} vs {restored:?}");
        assert!(close(restored.y1, original.y1, 1e-9), "{original:?} vs {restored:?}");
    }
}

#[test]
fn resize_keeps_origin_and_scale() {
    let mut rng = StdRng::seed_from_u64(2024);
    for _ in 0..CASES {
        let mut viewport = random_viewport(&mut rng);
        let origin = viewport.canvas_to_image(Point::new(0.0, 0.0));
        let (sx, sy) = viewport.scale();
        viewport.resize(CanvasSize::new(
            rng.gen_range(50.0..3_000.0),
            rng.gen_range(50.0..3_000.0),
        ));
        let moved = viewport.canvas_to_image(Point::new(0.0, 0.0));
        let (nx, ny) = viewport.scale();
        assert!(close(origin.x, moved.x, 1e-9) && close(origin.y, moved.y, 1e-9));
        assert!(close(sx, nx, 1e-9) && close(sy, ny, 1e-9));
    }
}

#[test]
fn endless_zoom_out_stays_finite_and_recovers() {
    let mut viewport = Viewport::new(
        Window::new(0.0, 0.0, 1_000.0, 1_000.0),
        CanvasSize::new(200.0, 200.0),
    );
    let anchor = Point::new(100.0, 100.0);
    for _ in 0..10_000 {
        viewport.zoom(anchor, false, DEFAULT_ZOOM_FACTOR);
        assert_valid(&viewport);
    }
    let widest = viewport.window();
    assert!(close(widest.width(), MAX_SPAN, 1e-9), "{widest:?}");

    for _ in 0..20 {
        viewport.zoom(anchor, true, DEFAULT_ZOOM_FACTOR);
        assert_valid(&viewport);
    }
    assert!(viewport.window().width() < widest.width() / 6.0);
}

#[test]
fn extreme_pans_keep_the_window_valid() {
    let mut rng = StdRng::seed_from_u64(0xfa57);
    for _ in 0..CASES {
        let mut viewport = random_viewport(&mut rng);
        for _ in 0..20 {
            let dx = rng.gen_range(-1.0..1.0) * f64::MAX;
            let dy = rng.gen_range(-1e18..1e18);
            viewport.pan(dx, dy);
            assert_valid(&viewport);
        }
        let centre = viewport.canvas_to_image(Point::new(25.0, 25.0));
        assert!(centre.x.is_finite() && centre.y.is_finite());
        viewport.zoom(Point::new(25.0, 25.0), false, 2.0);
        assert_valid(&viewport);
    }
}
