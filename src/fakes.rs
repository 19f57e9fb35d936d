//! Stand-ins for the OCR service and the chat model, shared by unit tests.

use crate::llm_extract::{ChatModel, LlmError};
use crate::ocr::{OcrError, OcrService};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

pub const SAMPLE_OCR_TEXT: &str = "Name: Jane Doe, SSN: 000-00-0000, DOB: 1990-01-01, \
Citizenship: U.S. Citizen\nCurrent Address: 12 Elm Street, Springfield, IL 62701\n\
Housing: Rent $1,450.50/month   No. of years: 3  Months: 4\n\
DL D1234567  ISS 01/01/2019  EXP 01/01/2027  CALIFORNIA\n";

pub const SAMPLE_REPLY: &str = r#"{
  "personal_details": {
    "name": "Jane Doe",
    "ssn": "000-00-0000",
    "citizenship": "U.S. Citizen",
    "dob": "1990-01-01"
  },
  "extra_details": {
    "type_of_credit": "Individual",
    "marital_status": "Unmarried",
    "cell_phone": "(555) 010-0199"
  },
  "current_address": {
    "street": "12 Elm Street",
    "city": "Springfield",
    "state": "IL",
    "zip_code": "62701",
    "residing_in_addr_since_years": 3,
    "residing_in_addr_since_months": 4,
    "own_house": false,
    "rented_house": true,
    "rent": 1450.5,
    "mailing_address_different": false
  },
  "employment_details": {
    "business_owner_or_self_employed": false,
    "ownership_of_25_pct_or_more": false
  },
  "license": {
    "number": "D1234567",
    "issue_date": "2019-01-01",
    "expiration_date": "2027-01-01",
    "issue_state": "California",
    "last_name": "Doe",
    "first_name": "Jane",
    "dob": "1990-01-01T00:00:00"
  }
}"#;

#[derive(Debug, Clone)]
pub struct ChatCall {
    pub system: String,
    pub user: String,
    pub temperature: f64,
}

/// Records every call and answers with a canned reply, or a 503.
pub struct StubChat {
    reply: Option<String>,
    calls: Mutex<Vec<ChatCall>>,
}

impl StubChat {
    pub fn replying(reply: &str) -> Self {
        Self {
            reply: Some(reply.to_string()),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn failing() -> Self {
        Self {
            reply: None,
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> Vec<ChatCall> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl ChatModel for StubChat {
    async fn complete(
        &self,
        system: &str,
        user: &str,
        temperature: f64,
    ) -> Result<String, LlmError> {
        self.calls.lock().unwrap().push(ChatCall {
            system: system.to_string(),
            user: user.to_string(),
            temperature,
        });
        self.reply.clone().ok_or(LlmError::Api {
            status: 503,
            body: "overloaded".to_string(),
        })
    }
}

/// Returns fixed text, or a fixed service error, for any document.
pub struct StubOcr {
    outcome: Result<String, String>,
    calls: Mutex<Vec<(PathBuf, Option<Vec<u32>>)>>,
}

impl StubOcr {
    pub fn returning(text: &str) -> Self {
        Self {
            outcome: Ok(text.to_string()),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn failing(message: &str) -> Self {
        Self {
            outcome: Err(message.to_string()),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> Vec<(PathBuf, Option<Vec<u32>>)> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl OcrService for StubOcr {
    async fn extract(&self, path: &Path, pages: Option<&[u32]>) -> Result<String, OcrError> {
        self.calls
            .lock()
            .unwrap()
            .push((path.to_path_buf(), pages.map(<[u32]>::to_vec)));
        self.outcome.clone().map_err(|message| OcrError::Service {
            status: Some(401),
            message,
        })
    }
}

/// Raw HTTP/1.1 response with a matching content-length.
pub fn http_response(status: &str, headers: &[(&str, &str)], body: &str) -> String {
    let mut out = format!("HTTP/1.1 {status}\r\n");
    for (name, value) in headers {
        out.push_str(&format!("{name}: {value}\r\n"));
    }
    out.push_str(&format!(
        "content-length: {}\r\nconnection: close\r\n\r\n{body}",
        body.len()
    ));
    out
}

/// Accepts one connection on a loopback port and answers it with `response`.
///
/// Returns the `http://127.0.0.1:<port>` base and a handle that yields the
/// raw request (head and body) as received.
pub async fn serve_once(response: String) -> (String, JoinHandle<Vec<u8>>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let base = format!("http://{}", listener.local_addr().unwrap());
    let handle = tokio::spawn(async move {
        let (mut stream, _) = listener.accept().await.unwrap();
        let mut request = Vec::new();
        let mut buf = [0u8; 4096];
        loop {
            let n = stream.read(&mut buf).await.unwrap();
            if n == 0 {
                break;
            }
            request.extend_from_slice(&buf[..n]);
            if let Some(head_end) = find(&request, b"\r\n\r\n") {
                let head = String::from_utf8_lossy(&request[..head_end]).to_lowercase();
                let body_len = head
                    .lines()
                    .find_map(|l| l.strip_prefix("content-length:"))
                    .and_then(|v| v.trim().parse::<usize>().ok())
                    .unwrap_or(0);
                if request.len() >= head_end + 4 + body_len {
                    break;
                }
            }
        }
        stream.write_all(response.as_bytes()).await.unwrap();
        let _ = stream.shutdown().await;
        request
    });
    (base, handle)
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|w| w == needle)
}
