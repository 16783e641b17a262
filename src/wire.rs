use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Semaphore;
use tokio_util::codec::{Framed, LinesCodec, LinesCodecError};
use tracing::{debug, error, info, warn};

use crate::engine::{BookingRequest, Engine};
use crate::limits::MAX_LINE_LEN;
use crate::model::*;
use crate::observability::{
    op_label, CONNECTIONS_ACTIVE, CONNECTIONS_REJECTED_TOTAL, CONNECTIONS_TOTAL, QUERIES_TOTAL,
    QUERY_DURATION_SECONDS,
};
use crate::protocol::{Request, Response};

const DRAIN_TIMEOUT: Duration = Duration::from_secs(10);

/// Accept clients until `shutdown` resolves, then wait (bounded) for open
/// connections to finish. Connections past `max_connections` are closed on accept.
pub async fn serve(
    listener: TcpListener,
    engine: Arc<Engine>,
    max_connections: usize,
    shutdown: impl Future<Output = ()>,
) {
    let semaphore = Arc::new(Semaphore::new(max_connections));
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            result = listener.accept() => {
                let (socket, peer) = match result {
                    Ok(conn) => conn,
                    Err(e) => {
                        error!("accept error: {e}");
                        continue;
                    }
                };

                let Ok(permit) = semaphore.clone().try_acquire_owned() else {
                    warn!("connection limit reached, rejecting {peer}");
                    metrics::counter!(CONNECTIONS_REJECTED_TOTAL).increment(1);
                    drop(socket);
                    continue;
                };

                debug!("connection from {peer}");
                metrics::counter!(CONNECTIONS_TOTAL).increment(1);
                metrics::gauge!(CONNECTIONS_ACTIVE).increment(1.0);
                let engine = engine.clone();
                tokio::spawn(async move {
                    let _permit = permit;
                    if let Err(e) = process_connection(socket, engine).await {
                        error!("connection error from {peer}: {e}");
                    }
                    metrics::gauge!(CONNECTIONS_ACTIVE).decrement(1.0);
                });
            }
            () = &mut shutdown => {
                info!("shutdown signal received, stopping accept loop");
                break;
            }
        }
    }

    let deadline = tokio::time::sleep(DRAIN_TIMEOUT);
    tokio::pin!(deadline);
    while semaphore.available_permits() < max_connections {
        tokio::select! {
            _ = &mut deadline => {
                let open = max_connections - semaphore.available_permits();
                warn!("drain timeout, {open} connections still open");
                return;
            }
            _ = tokio::time::sleep(Duration::from_millis(100)) => {}
        }
    }
    info!("all connections drained");
}

/// Serve one client until it disconnects. One JSON request per line in, one
/// JSON response per line out, strictly in order.
pub async fn process_connection(
    socket: TcpStream,
    engine: Arc<Engine>,
) -> Result<(), LinesCodecError> {
    let mut lines = Framed::new(socket, LinesCodec::new_with_max_length(MAX_LINE_LEN));

    while let Some(frame) = lines.next().await {
        let response = match frame {
            Ok(line) if line.trim().is_empty() => continue,
            Ok(line) => handle_line(&engine, &line).await,
            // The codec skips the rest of the oversized line and keeps going.
            Err(LinesCodecError::MaxLineLengthExceeded) => {
                Response::bad_request(format!("request line exceeds {MAX_LINE_LEN} bytes"))
            }
            Err(e) => return Err(e),
        };
        lines.send(encode(&response)).await?;
    }
    Ok(())
}

/// Decode, execute, and record metrics for one request line.
pub async fn handle_line(engine: &Engine, line: &str) -> Response {
    let req: Request = match serde_json::from_str(line) {
        Ok(req) => req,
        Err(e) => {
            debug!("bad request: {e}");
            metrics::counter!(QUERIES_TOTAL, "op" => "unknown", "status" => "error").increment(1);
            return Response::bad_request(e.to_string());
        }
    };

    let op = op_label(&req);
    let start = Instant::now();
    let response = execute(engine, req).await;
    metrics::histogram!(QUERY_DURATION_SECONDS, "op" => op).record(start.elapsed().as_secs_f64());
    metrics::counter!(QUERIES_TOTAL, "op" => op, "status" => response.status_label()).increment(1);
    response
}

pub async fn execute(engine: &Engine, req: Request) -> Response {
    match req {
        Request::Availability {
            date,
            staff_id,
            service_id,
        } => match engine.query(date, staff_id, service_id).await {
            Ok(result) => Response::availability(&result),
            Err(e) => Response::error(&e),
        },
        Request::Book {
            staff_id,
            date,
            start_time,
            service_id,
            label,
            status,
        } => {
            let req = BookingRequest {
                label,
                status: status.unwrap_or(BookingStatus::Confirmed),
                ..BookingRequest::new(staff_id, date, start_time, service_id)
            };
            let status = req.status;
            match engine.create_booking(req).await {
                Ok(id) => Response::booking(id, status),
                Err(e) => Response::error(&e),
            }
        }
        Request::SetStatus { booking_id, status } => {
            match engine.set_status(booking_id, status).await {
                Ok(b) => Response::booking(b.id, b.status),
                Err(e) => Response::error(&e),
            }
        }
        Request::Cancel { booking_id } => match engine.cancel_booking(booking_id).await {
            Ok(b) => Response::booking(b.id, b.status),
            Err(e) => Response::error(&e),
        },
    }
}

fn encode(response: &Response) -> String {
    serde_json::to_string(response).unwrap_or_else(|e| {
        format!(
            r#"{{"ok":false,"error":{{"kind":"internal","status":500,"retryable":false,"message":"{}"}}}}"#,
            e.to_string().replace('"', "'")
        )
    })
}
