//! Parser for httpx `-json` output, one JSON object per responding URL.

use serde::Deserialize;
use super::parse::{OutputParser, ParseOutcome};
use super::runner::ToolOutput;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HttpResponse {
    pub url: String,
    /// Final status after redirects.
    pub status_code: Option<u16>,
    pub title: String,
    pub server: String,
    pub technologies: Vec<String>,
}

/// The subset of an httpx JSON record the pipeline keeps.
#[derive(Debug, Deserialize)]
struct HttpxRecord {
    url: String,
    #[serde(default)]
    status_code: Option<u16>,
    #[serde(default)]
    chain_status_codes: Vec<u16>,
    #[serde(default)]
    title: String,
    #[serde(default)]
    webserver: String,
    #[serde(default)]
    tech: Vec<String>,
}

impl From<HttpxRecord> for HttpResponse {
    fn from(record: HttpxRecord) -> Self {
        Self {
            status_code: record.chain_status_codes.last().copied().or(record.status_code),
            url: record.url,
            title: record.title.trim().to_string(),
            server: record.webserver.trim().to_string(),
            technologies: record
                .tech
                .into_iter()
                .map(|t| t.trim().to_string())
                .filter(|t| !t.is_empty())
                .collect(),
        }
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct HttpxParser;

impl OutputParser for HttpxParser {
    type Record = HttpResponse;

    fn parse(&self, output: &ToolOutput) -> ParseOutcome<HttpResponse> {
        let mut records = Vec::new();
        let mut unrecognised = 0;
        for line in output.stdout.lines().map(str::trim).filter(|l| !l.is_empty()) {
            match serde_json::from_str::<HttpxRecord>(line) {
                Ok(record) if record.url.contains("://") => records.push(record.into()),
                _ => unrecognised += 1,
            }
        }
        if records.is_empty() && unrecognised > 0 {
            return ParseOutcome::Failure(format!("{} unrecognised result lines", unrecognised));
        }
        ParseOutcome::from_records(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn out(stdout: &str) -> ToolOutput {
        ToolOutput { stdout: stdout.into(), exit_code: Some(0), ..Default::default() }
    }

    fn one(stdout: &str) -> HttpResponse {
        let ParseOutcome::Records(mut r) = HttpxParser.parse(&out(stdout)) else {
            panic!("expected record");
        };
        r.remove(0)
    }

    #[test]
    fn test_full_record() {
        let r = one(concat!(
            r#"{"timestamp":"2026-10-15T10:00:00Z","url":"https://www.python.org","input":"www.python.org","#,
            r#""title":"Welcome to Python.org","webserver":"nginx/1.24","tech":["HSTS","Varnish","jQuery:1.8.2"],"#,
            r#""status_code":200,"failed":false}"#,
            "\n"
        ));
        assert_eq!(r.url, "https://www.python.org");
        assert_eq!(r.status_code, Some(200));
        assert_eq!(r.title, "Welcome to Python.org");
        assert_eq!(r.server, "nginx/1.24");
        assert_eq!(r.technologies, vec!["HSTS", "Varnish", "jQuery:1.8.2"]);
    }

    #[test]
    fn test_punctuated_title_stays_in_title() {
        let r = one(
            r#"{"url":"https://a.example.com","status_code":200,"title":"Hello, World","webserver":"nginx","tech":["PHP"]}"#,
        );
        assert_eq!(r.title, "Hello, World");
        assert_eq!(r.server, "nginx");
        assert_eq!(r.technologies, vec!["PHP"]);

        let r = one(
            r#"{"url":"https://a.example.com","status_code":200,"title":"Login / Admin","webserver":"Apache/2.4"}"#,
        );
        assert_eq!(r.title, "Login / Admin");
        assert_eq!(r.server, "Apache/2.4");
        assert!(r.technologies.is_empty());
    }

    #[test]
    fn test_redirect_chain_takes_final_status() {
        let r = one(r#"{"url":"http://1.2.3.4:80","status_code":301,"chain_status_codes":[301,200],"title":"Login"}"#);
        assert_eq!(r.status_code, Some(200));
        assert_eq!(r.title, "Login");
        assert!(r.server.is_empty());
    }

    #[test]
    fn test_silent_no_response_is_empty() {
        assert_eq!(HttpxParser.parse(&out("")), ParseOutcome::Empty);
    }

    #[test]
    fn test_non_json_output_is_failure() {
        assert!(matches!(
            HttpxParser.parse(&out("[FTL] Could not read flags\n")),
            ParseOutcome::Failure(_)
        ));
    }
}
