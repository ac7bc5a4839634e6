//! Tiny HTTP/1.1 portal: a login form, cookie-gated data pages, logout.

#![allow(dead_code)]

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;

pub const LOGIN_PATH: &str = "/attendance/attendanceLogin.php";
pub const HOME_PATH: &str = "/attendance/home.php";
pub const ATTENDANCE_PATH: &str = "/attendance/attendanceTillADate.php";
pub const MID_MARKS_PATH: &str = "/attendance/midMarks.php";
pub const PERSONAL_PATH: &str = "/attendance/studentDetails.php";
pub const LOGOUT_PATH: &str = "/attendance/logout.php";

const SESSION_COOKIE: &str = "PHPSESSID=portal-test-session";

pub const LOGIN_PAGE: &str = r#"<html><body>
<form method="post" action="attendanceLogin.php">
  <input type="hidden" name="csrf" value="token-123">
  <input type="text" name="username">
  <input type="password" name="password">
  <input type="submit" name="submit" value="Login">
</form>
</body></html>"#;

pub const ATTENDANCE_PAGE: &str = r#"<html><body>
<table>
  <tr><th>S.No</th><th>Subject</th><th>Held</th><th>Attended</th><th>Att %</th></tr>
  <tr><td>1</td><td>Maths</td><td>40</td><td>35</td><td>87.5</td></tr>
  <tr><td>2</td><td>Physics</td><td>20</td><td>15</td><td>75</td></tr>
</table>
</body></html>"#;

pub const MID_MARKS_PAGE: &str = r#"<html><body>
<table>
  <tr><th>Subject</th><th>Mid 1</th><th>Mid 2</th></tr>
  <tr><td>Maths</td><td>24</td><td>22</td></tr>
</table>
</body></html>"#;

pub const PERSONAL_PAGE: &str = r#"<html><body>
<table>
  <tr><td>Name</td><td>:</td><td>A Student</td></tr>
  <tr><td>Branch</td><td>:</td><td>CSE</td></tr>
</table>
</body></html>"#;

/// A request as seen by the server.
#[derive(Debug, Clone)]
pub struct SeenRequest {
    pub method: String,
    pub target: String,
    pub body: String,
}

pub struct PortalServer {
    pub addr: SocketAddr,
    requests: Arc<Mutex<Vec<SeenRequest>>>,
    handle: JoinHandle<()>,
}

impl PortalServer {
    /// Serves a portal accepting `username` / `password`.
    pub async fn start(username: &str, password: &str) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind test portal");
        let addr = listener.local_addr().expect("local addr");
        let requests = Arc::new(Mutex::new(Vec::new()));

        let credentials = Arc::new((username.to_string(), password.to_string()));
        let seen = Arc::clone(&requests);
        let handle = tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                let credentials = Arc::clone(&credentials);
                let seen = Arc::clone(&seen);
                tokio::spawn(async move {
                    let _ = serve(stream, &credentials, &seen).await;
                });
            }
        });

        Self {
            addr,
            requests,
            handle,
        }
    }

    pub fn base_url(&self) -> String {
        format!("http://{}", self.addr)
    }

    pub fn requests(&self) -> Vec<SeenRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn saw(&self, method: &str, path: &str) -> bool {
        self.requests()
            .iter()
            .any(|r| r.method == method && r.target.starts_with(path))
    }
}

impl Drop for PortalServer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

async fn serve(
    stream: TcpStream,
    credentials: &(String, String),
    seen: &Mutex<Vec<SeenRequest>>,
) -> std::io::Result<()> {
    let mut reader = BufReader::new(stream);

    let mut request_line = String::new();
    reader.read_line(&mut request_line).await?;
    let mut parts = request_line.split_whitespace();
    let method = parts.next().unwrap_or_default().to_string();
    let target = parts.next().unwrap_or_default().to_string();

    let mut headers = HashMap::new();
    loop {
        let mut line = String::new();
        reader.read_line(&mut line).await?;
        let line = line.trim_end();
        if line.is_empty() {
            break;
        }
        if let Some((name, value)) = line.split_once(':') {
            headers.insert(name.trim().to_ascii_lowercase(), value.trim().to_string());
        }
    }

    let length: usize = headers
        .get("content-length")
        .and_then(|v| v.parse().ok())
        .unwrap_or(0);
    let mut body = vec![0; length];
    reader.read_exact(&mut body).await?;
    let body = String::from_utf8_lossy(&body).to_string();

    seen.lock().unwrap().push(SeenRequest {
        method: method.clone(),
        target: target.clone(),
        body: body.clone(),
    });

    let logged_in = headers
        .get("cookie")
        .is_some_and(|cookie| cookie.contains(SESSION_COOKIE));
    let path = target.split('?').next().unwrap_or_default();

    let response = match (method.as_str(), path) {
        ("GET", LOGIN_PATH) => ok(LOGIN_PAGE),
        ("POST", LOGIN_PATH) => {
            let form = parse_form(&body);
            let accepted = form.get("username") == Some(&credentials.0)
                && form.get("password") == Some(&credentials.1)
                && form.get("csrf").map(String::as_str) == Some("token-123");
            if accepted {
                format!(
                    "HTTP/1.1 302 Found\r\nLocation: {}\r\nSet-Cookie: {}; Path=/\r\nContent-Length: 0\r\nConnection: close\r\n\r\n",
                    HOME_PATH, SESSION_COOKIE
                )
            } else {
                ok(LOGIN_PAGE)
            }
        }
        ("GET", _) if !logged_in => format!(
            "HTTP/1.1 302 Found\r\nLocation: {}\r\nContent-Length: 0\r\nConnection: close\r\n\r\n",
            LOGIN_PATH
        ),
        ("GET", HOME_PATH) => ok("<html><body>Welcome</body></html>"),
        ("GET", ATTENDANCE_PATH) => ok(ATTENDANCE_PAGE),
        ("GET", MID_MARKS_PATH) => ok(MID_MARKS_PAGE),
        ("GET", PERSONAL_PATH) => ok(PERSONAL_PAGE),
        ("GET", LOGOUT_PATH) => ok("<html><body>Bye</body></html>"),
        _ => "HTTP/1.1 404 Not Found\r\nContent-Length: 0\r\nConnection: close\r\n\r\n".to_string(),
    };

    let mut stream = reader.into_inner();
    stream.write_all(response.as_bytes()).await?;
    stream.shutdown().await
}

fn ok(body: &str) -> String {
    format!(
        "HTTP/1.1 200 OK\r\nContent-Type: text/html; charset=utf-8\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
        body.len(),
        body
    )
}

fn parse_form(body: &str) -> HashMap<String, String> {
    body.split('&')
        .filter_map(|pair| pair.split_once('='))
        .map(|(k, v)| (decode(k), decode(v)))
        .collect()
}

fn decode(raw: &str) -> String {
    let bytes = raw.replace('+', " ").into_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' && i + 2 < bytes.len() {
            let hex = String::from_utf8_lossy(&bytes[i + 1..i + 3]).to_string();
            if let Ok(byte) = u8::from_str_radix(&hex, 16) {
                out.push(byte);
                i += 3;
                continue;
            }
        }
        out.push(bytes[i]);
        i += 1;
    }
    String::from_utf8_lossy(&out).to_string()
}
