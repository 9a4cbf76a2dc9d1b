//! Loopback HTTP listener for the sign-in redirect.
//!
//! Accepts a single redirect to `/callback`, shows the user a short page,
//! and hands the full redirect URL back as the completion payload.

use std::io::{Read, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::mpsc;
use std::time::Duration;
use tracing::{debug, error, info};

use crate::auth::completer::CompletionPayload;

/// The port used for the redirect listener.
pub const CALLBACK_PORT: u16 = 28491;

/// Listen until one redirect arrives or `cancel_rx` fires.
pub fn start_callback_server(cancel_rx: mpsc::Receiver<()>) -> CompletionPayload {
    let addr = format!("127.0.0.1:{}", CALLBACK_PORT);

    let listener = match TcpListener::bind(&addr) {
        Ok(l) => l,
        Err(e) => {
            error!("Failed to bind redirect listener to {}: {}", addr, e);
            return CompletionPayload::Error(format!("Failed to start listener: {}", e));
        }
    };

    // Non-blocking so cancellation is noticed
    if let Err(e) = listener.set_nonblocking(true) {
        error!("Failed to set non-blocking mode: {}", e);
        return CompletionPayload::Error(format!("Listener configuration error: {}", e));
    }

    info!("Redirect listener on {}", addr);

    loop {
        match cancel_rx.try_recv() {
            Ok(()) | Err(mpsc::TryRecvError::Disconnected) => {
                info!("Redirect listener cancelled");
                return CompletionPayload::Cancelled;
            }
            Err(mpsc::TryRecvError::Empty) => {}
        }

        match listener.accept() {
            Ok((stream, peer_addr)) => {
                debug!("Connection from {}", peer_addr);
                if let Some(url) = handle_connection(stream) {
                    info!("Sign-in redirect received");
                    return CompletionPayload::Redirect(url);
                }
            }
            Err(ref e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                std::thread::sleep(Duration::from_millis(100));
            }
            Err(e) => {
                error!("Error accepting connection: {}", e);
                return CompletionPayload::Error(format!("Connection error: {}", e));
            }
        }
    }
}

/// Returns the redirect URL if this connection carried one.
fn handle_connection(mut stream: TcpStream) -> Option<String> {
    let _ = stream.set_read_timeout(Some(Duration::from_secs(5)));

    let mut buffer = [0; 4096];
    let bytes_read = match stream.read(&mut buffer) {
        Ok(n) => n,
        Err(e) => {
            debug!("Failed to read request: {}", e);
            return None;
        }
    };

    let request = String::from_utf8_lossy(&buffer[..bytes_read]);
    let request_line = request.lines().next()?;
    debug!("Received request: {}", request_line);

    match classify_request_line(request_line) {
        RequestKind::Redirect { path, failed } => {
            if failed {
                let description = error_description(&path)
                    .unwrap_or_else(|| "Sign-in was cancelled or failed.".to_string());
                send_page(&mut stream, "Sign-in Failed", &description, "#EF4444");
            } else {
                send_page(
                    &mut stream,
                    "Sign-in Successful",
                    "You are signed in to Directory Searcher.",
                    "#10B981",
                );
            }
            Some(format!("http://localhost:{}{}", CALLBACK_PORT, path))
        }
        RequestKind::Reject { status, reason } => {
            send_error_response(&mut stream, status, reason);
            None
        }
    }
}

#[derive(Debug, PartialEq)]
enum RequestKind {
    Redirect { path: String, failed: bool },
    Reject { status: u16, reason: &'static str },
}

fn classify_request_line(line: &str) -> RequestKind {
    let parts: Vec<&str> = line.split_whitespace().collect();
    if parts.len() < 2 {
        return RequestKind::Reject {
            status: 400,
            reason: "Bad Request",
        };
    }

    let (method, path) = (parts[0], parts[1]);
    if method != "GET" {
        return RequestKind::Reject {
            status: 405,
            reason: "Method Not Allowed",
        };
    }
    if !path.starts_with("/callback") {
        return RequestKind::Reject {
            status: 404,
            reason: "Not Found",
        };
    }

    // Error redirects are still forwarded so the failure reaches the caller
    if path.contains("error=") {
        return RequestKind::Redirect {
            path: path.to_string(),
            failed: true,
        };
    }
    if !path.contains("code=") {
        return RequestKind::Reject {
            status: 400,
            reason: "Missing authorization code",
        };
    }

    RequestKind::Redirect {
        path: path.to_string(),
        failed: false,
    }
}

fn error_description(path: &str) -> Option<String> {
    let start = path.find("error_description=")? + "error_description=".len();
    let end = path[start..]
        .find('&')
        .map(|i| start + i)
        .unwrap_or(path.len());
    urlencoding::decode(&path[start..end].replace('+', " "))
        .ok()
        .map(|s| s.into_owned())
}

fn send_page(stream: &mut TcpStream, title: &str, message: &str, accent: &str) {
    let html = format!(
        r#"<!DOCTYPE html>
<html lang="en">
<head>
    <meta charset="UTF-8">
    <title>{title}</title>
    <style>
        body {{
            font-family: -apple-system, BlinkMacSystemFont, 'Segoe UI', Roboto, sans-serif;
            display: flex;
            align-items: center;
            justify-content: center;
            min-height: 100vh;
            margin: 0;
        }}
        .container {{ text-align: center; max-width: 400px; }}
        h1 {{ color: {accent}; font-size: 1.5rem; }}
        .hint {{ color: #9CA3AF; font-size: 0.875rem; }}
    </style>
</head>
<body>
    <div class="container">
        <h1>{title}</h1>
        <p>{message}</p>
        <p class="hint">You can close this tab and return to the app.</p>
    </div>
</body>
</html>"#,
        title = title,
        message = html_escape(message),
        accent = accent,
    );

    let response = format!(
        "HTTP/1.1 200 OK\r\nContent-Type: text/html; charset=utf-8\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
        html.len(),
        html
    );

    let _ = stream.write_all(response.as_bytes());
    let _ = stream.flush();
}

fn html_escape(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

fn send_error_response(stream: &mut TcpStream, status: u16, message: &str) {
    let response = format!(
        "HTTP/1.1 {} {}\r\nContent-Type: text/plain\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
        status,
        message,
        message.len(),
        message
    );

    let _ = stream.write_all(response.as_bytes());
    let _ = stream.flush();
}
