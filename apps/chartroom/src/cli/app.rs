use image::Rgba;
use parking_lot::RwLock;
use serde_json::{Value, json};
use std::fs;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;
use tokio::time::{sleep, timeout};
use tracing::{debug, info, warn};

use crate::cli::{Cli, Command, RenderArgs, RequestArgs, SessionCommand, WatchArgs};
use crate::cli::error::CliError;
use crate::config::ClientConfig;
use crate::protocol::tiles::{TiledImageHeader, Waypoint};
use crate::protocol::{ClientRequest, Inbound, OutboundMessage, ServerMessage};
use crate::render::{CanvasBuffer, TileLayout, TileRenderer, WaypointOverlay};
use crate::tiles::{HttpTileFetcher, TileCache};
use crate::transport::{
    ConnectionPhase, FileSessionStore, SessionStore, Transport, TransportEvent, WebSocketConnector,
};
use crate::viewport::{CanvasSize, DEFAULT_ZOOM_FACTOR, Point, SharedViewport, Viewport};

pub async fn run(cli: Cli) -> Result<(), CliError> {
    let config = cli.connection.resolve()?;
    debug!(
        target = "chartroom::cli",
        server = %config.server_url,
        tile_base = %config.tile_base,
        "configuration resolved"
    );

    match cli.command {
        Command::Watch(args) => watch(&config, args).await,
        Command::Request(args) => request(&config, args).await,
        Command::Render(args) => render(&config, args).await,
        Command::Session(command) => session(&config, command),
    }
}

fn session_store(config: &ClientConfig) -> Result<FileSessionStore, CliError> {
    match &config.session_file {
        Some(path) => Ok(FileSessionStore::new(path)),
        None => Ok(FileSessionStore::at_default_path()?),
    }
}

fn open_transport(config: &ClientConfig) -> Result<Transport, CliError> {
    let store = session_store(config)?;
    let transport = Transport::new(
        config.transport(),
        Arc::new(WebSocketConnector),
        Arc::new(store),
    );
    transport.connect();
    Ok(transport)
}

async fn within<T, E>(
    seconds: u64,
    what: impl Into<String>,
    future: impl Future<Output = Result<T, E>>,
) -> Result<T, CliError>
where
    CliError: From<E>,
{
    match timeout(Duration::from_secs(seconds), future).await {
        Ok(result) => result.map_err(CliError::from),
        Err(_) => Err(CliError::Timeout(what.into())),
    }
}

async fn watch(config: &ClientConfig, args: WatchArgs) -> Result<(), CliError> {
    let transport = open_transport(config)?;
    let mut events = transport.events();
    let mut pushes = transport.subscribe_all();

    let deadline = async {
        match args.duration {
            Some(seconds) => sleep(Duration::from_secs(seconds)).await,
            None => std::future::pending::<()>().await,
        }
    };
    tokio::pin!(deadline);
    let interrupt = tokio::signal::ctrl_c();
    tokio::pin!(interrupt);

    loop {
        tokio::select! {
            _ = &mut deadline => break,
            _ = &mut interrupt => {
                info!(target = "chartroom::cli", "interrupted");
                break;
            }
            event = events.recv() => match event {
                Ok(event) => println!("{}", describe_event(&event)),
                Err(RecvError::Lagged(skipped)) => {
                    warn!(target = "chartroom::cli", skipped, "event stream lagged");
                }
                Err(RecvError::Closed) => break,
            },
            push = pushes.recv() => match push {
                Ok(delivery) => println!("{}", describe_inbound(&delivery.message)),
                Err(RecvError::Lagged(skipped)) => {
                    warn!(target = "chartroom::cli", skipped, "push stream lagged");
                }
                Err(RecvError::Closed) => break,
            },
        }
    }

    transport.shutdown();
    Ok(())
}

async fn request(config: &ClientConfig, args: RequestArgs) -> Result<(), CliError> {
    let mut message = OutboundMessage::new(&args.kind);
    if let Some(raw) = &args.payload {
        let payload: Value = serde_json::from_str(raw)?;
        message = message.with_payload(payload)?;
    }
    let expected: Vec<String> = if args.expect.is_empty() {
        ClientRequest::expected_for_kind(&args.kind)
            .iter()
            .map(|kind| kind.to_string())
            .collect()
    } else {
        args.expect.clone()
    };

    let transport = open_transport(config)?;
    let outcome = within(
        args.timeout,
        format!("a reply to {}", args.kind),
        transport.request(message, &expected[..]),
    )
    .await;
    transport.shutdown();
    let reply = outcome?;

    println!("{}", describe_inbound(&reply));
    if let Some(path) = &args.save {
        let Some(bytes) = &reply.attachment else {
            return Err(CliError::UnexpectedReply(format!(
                "{} carried no binary payload",
                reply.kind
            )));
        };
        fs::write(path, bytes)?;
        info!(
            target = "chartroom::cli",
            path = %path.display(),
            bytes = bytes.len(),
            "attachment saved"
        );
    }
    Ok(())
}

async fn render(config: &ClientConfig, args: RenderArgs) -> Result<(), CliError> {
    if args.width == 0 || args.height == 0 {
        return Err(CliError::InvalidArgument(
            "canvas width and height must be positive".into(),
        ));
    }

    let transport = if args.header.is_none() || args.waypoints {
        Some(open_transport(config)?)
    } else {
        None
    };
    let fetched = fetch_chart(transport.as_ref(), &args).await;
    if let Some(transport) = &transport {
        transport.shutdown();
    }
    let (header, waypoints) = fetched?;

    let layout = TileLayout::from_header(&header);
    let (image_width, image_height) = layout.image_size();
    let canvas = CanvasSize::new(f64::from(args.width), f64::from(args.height));
    let viewport: SharedViewport = Arc::new(RwLock::new(Viewport::fit_image(
        image_width,
        image_height,
        canvas,
    )));
    let fetcher = Arc::new(HttpTileFetcher::new(config.tile_base.clone()));
    let cache = Arc::new(TileCache::new(fetcher, config.tile_cache()));
    let sink = Arc::new(CanvasBuffer::new());
    let renderer = TileRenderer::new(cache.clone(), viewport, sink.clone())
        .with_background(Rgba([255, 255, 255, 255]));
    renderer.set_layout(layout);

    if args.zoom != 0 {
        let anchor = Point::new(canvas.width / 2.0, canvas.height / 2.0);
        renderer.update_viewport(|viewport| {
            for _ in 0..args.zoom.unsigned_abs() {
                viewport.zoom(anchor, args.zoom > 0, DEFAULT_ZOOM_FACTOR);
            }
        });
    }

    let report = within(args.timeout, "tiles", async {
        Ok::<_, CliError>(renderer.render().await)
    })
    .await?;
    for (col, row, err) in &report.failed {
        warn!(target = "chartroom::cli", col, row, error = %err, "tile missing from frame");
    }

    if !waypoints.is_empty() {
        renderer.set_overlay(Arc::new(WaypointOverlay::new(waypoints)));
        renderer.draw_overlay_transformed();
    }

    let mut frame = sink
        .latest()
        .ok_or_else(|| CliError::UnexpectedReply("renderer presented no frame".into()))?;
    frame.overlay(&renderer.overlay_frame());
    frame.save_png(&args.out)?;

    let stats = cache.stats();
    println!(
        "{}",
        json!({
            "out": args.out.display().to_string(),
            "generation": report.generation,
            "drawn": report.drawn,
            "failed": report.failed.len(),
            "downloads": stats.downloads,
        })
    );
    Ok(())
}

async fn fetch_chart(
    transport: Option<&Transport>,
    args: &RenderArgs,
) -> Result<(TiledImageHeader, Vec<Waypoint>), CliError> {
    let header = match (&args.header, transport) {
        (Some(path), _) => serde_json::from_str(&fs::read_to_string(path)?)?,
        (None, Some(transport)) => {
            let reply = within(
                args.timeout,
                "the low resolution map",
                transport.call(&ClientRequest::GetLowResMap),
            )
            .await?;
            match reply.message {
                ServerMessage::TiledImage(header) => header,
                other => return Err(CliError::UnexpectedReply(format!("{other:?}"))),
            }
        }
        (None, None) => {
            return Err(CliError::InvalidArgument(
                "no header file and no server connection".into(),
            ));
        }
    };

    let waypoints = match transport {
        Some(transport) if args.waypoints => {
            let reply = within(
                args.timeout,
                "waypoints",
                transport.call(&ClientRequest::GetWaypoints),
            )
            .await?;
            match reply.message {
                ServerMessage::Waypoints(waypoints) => waypoints,
                other => return Err(CliError::UnexpectedReply(format!("{other:?}"))),
            }
        }
        _ => Vec::new(),
    };
    Ok((header, waypoints))
}

fn session(config: &ClientConfig, command: SessionCommand) -> Result<(), CliError> {
    let store = session_store(config)?;
    match command {
        SessionCommand::Show => match store.load() {
            Some(session_id) => println!("{session_id}"),
            None => println!("no stored session ({})", store.path().display()),
        },
        SessionCommand::Clear => {
            store.clear()?;
            println!("cleared {}", store.path().display());
        }
    }
    Ok(())
}

fn describe_event(event: &TransportEvent) -> Value {
    match event {
        TransportEvent::Phase(phase) => json!({ "event": "phase", "phase": phase_label(phase) }),
        TransportEvent::SessionAssigned(session_id) => {
            json!({ "event": "session", "session_id": session_id })
        }
        TransportEvent::Rejected { reason } => json!({ "event": "rejected", "reason": reason }),
        TransportEvent::Fault(fault) => json!({
            "event": "fault",
            "exception_type": fault.kind,
            "message": fault.message,
            "origin": fault.event,
        }),
        TransportEvent::OrphanAttachment { len } => {
            json!({ "event": "orphan-attachment", "bytes": len })
        }
    }
}

fn phase_label(phase: &ConnectionPhase) -> String {
    match phase {
        ConnectionPhase::ReconnectScheduled { attempt, delay } => {
            format!("reconnect #{attempt} in {}ms", delay.as_millis())
        }
        other => format!("{other:?}").to_lowercase(),
    }
}

fn describe_inbound(inbound: &Inbound) -> Value {
    let body = match &inbound.message {
        ServerMessage::SetSession { session_id } => json!({ "session_id": session_id }),
        ServerMessage::Unauthorized { reason } => json!({ "reason": reason }),
        ServerMessage::Fault(fault) => json!({
            "exception_type": fault.kind,
            "message": fault.message,
            "origin": fault.event,
        }),
        ServerMessage::Outcome { result, message } => {
            json!({ "result": result, "message": message })
        }
        ServerMessage::TiledImage(header) => serde_json::to_value(header).unwrap_or(Value::Null),
        ServerMessage::Waypoints(waypoints) => {
            serde_json::to_value(waypoints).unwrap_or(Value::Null)
        }
        ServerMessage::Document(meta) => json!({ "format": format!("{:?}", meta.format) }),
        ServerMessage::Other { body, .. } => body.clone(),
    };
    json!({
        "type": inbound.kind,
        "request_id": inbound.request_id,
        "attachment_bytes": inbound.attachment.as_ref().map(|bytes| bytes.len()),
        "body": body,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn events_describe_reconnect_delays() {
        let value = describe_event(&TransportEvent::Phase(ConnectionPhase::ReconnectScheduled {
            attempt: 2,
            delay: Duration::from_secs(4),
        }));
        assert_eq!(value["phase"], "reconnect #2 in 4000ms");
        let value = describe_event(&TransportEvent::Phase(ConnectionPhase::Open));
        assert_eq!(value["phase"], "open");
    }

    #[test]
    fn inbound_descriptions_keep_unknown_bodies() {
        let (inbound, _) =
            Inbound::decode(r#"{"type":"legs","request_id":"r1","count":3}"#).unwrap();
        let value = describe_inbound(&inbound);
        assert_eq!(value["type"], "legs");
        assert_eq!(value["request_id"], "r1");
        assert_eq!(value["body"]["count"], 3);
    }
}
