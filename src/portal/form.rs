//! Provisioning form: page rendering and submission decoding.

use super::PortalStatus;
use crate::config::{ConfigError, Credentials};
use std::fmt;
use zeroize::Zeroizing;

/// Decode an `application/x-www-form-urlencoded` body into credentials.
///
/// Expects `ssid` and `password` fields; `password` may be empty for open
/// networks. Unknown fields are ignored.
pub fn parse_credentials(body: &str) -> Result<Credentials, FormError> {
    let mut ssid = None;
    let mut password = None;

    for pair in body.split('&').filter(|p| !p.is_empty()) {
        let (name, value) = pair.split_once('=').unwrap_or((pair, ""));
        match decode_component(name)?.as_str() {
            "ssid" => ssid = Some(decode_component(value)?),
            "password" => password = Some(decode_component(value)?),
            _ => {}
        }
    }

    let ssid = ssid.ok_or(FormError::MissingField("ssid"))?;
    let password = password.unwrap_or_else(|| Zeroizing::new(String::new()));

    // SSIDs may legitimately carry spaces, but not leading/trailing ones
    // typed by accident on a phone keyboard.
    Credentials::new(ssid.trim(), password.as_str()).map_err(FormError::Invalid)
}

/// Percent-decode one form component (`+` is a space).
fn decode_component(raw: &str) -> Result<Zeroizing<String>, FormError> {
    let mut bytes = Zeroizing::new(Vec::with_capacity(raw.len()));
    let mut input = raw.bytes();

    while let Some(b) = input.next() {
        match b {
            b'+' => bytes.push(b' '),
            b'%' => {
                let hi = input.next().and_then(hex_value);
                let lo = input.next().and_then(hex_value);
                match (hi, lo) {
                    (Some(hi), Some(lo)) => bytes.push((hi << 4) | lo),
                    _ => return Err(FormError::Encoding),
                }
            }
            _ => bytes.push(b),
        }
    }

    String::from_utf8(bytes.to_vec())
        .map(Zeroizing::new)
        .map_err(|_| FormError::Encoding)
}

fn hex_value(b: u8) -> Option<u8> {
    match b {
        b'0'..=b'9' => Some(b - b'0'),
        b'a'..=b'f' => Some(b - b'a' + 10),
        b'A'..=b'F' => Some(b - b'A' + 10),
        _ => None,
    }
}

/// Escape text for inclusion in HTML.
fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

/// Render the portal page for the current status.
pub fn render_page(portal_name: &str, status: &PortalStatus) -> String {
    let name = escape_html(portal_name);
    let (banner, refresh) = match status {
        PortalStatus::Waiting => (String::new(), false),
        PortalStatus::Connecting { ssid } => (
            format!(
                r#"<p class="info">Connecting to <b>{}</b>&hellip;</p>"#,
                escape_html(ssid)
            ),
            true,
        ),
        PortalStatus::Connected { ip } => (
            format!(
                r#"<p class="ok">Connected, device address {}. You can close this page.</p>"#,
                escape_html(ip)
            ),
            false,
        ),
        PortalStatus::Failed { reason } => (
            format!(
                r#"<p class="err">Could not connect: {}</p>"#,
                escape_html(reason)
            ),
            false,
        ),
    };
    let refresh = if refresh {
        r#"<meta http-equiv="refresh" content="3">"#
    } else {
        ""
    };

    format!(
        r#"<!DOCTYPE html>
<html><head><meta charset="utf-8"><meta name="viewport" content="width=device-width,initial-scale=1">{refresh}
<title>{name} setup</title>
<style>body{{font-family:sans-serif;max-width:22em;margin:2em auto}}input{{width:100%;margin:.3em 0 1em}}.err{{color:#b00}}.ok{{color:#070}}</style>
</head><body>
<h1>{name}</h1>
{banner}
<form method="post" action="/save">
<label>Network (SSID)<input name="ssid" maxlength="32" required></label>
<label>Password<input name="password" type="password" maxlength="64"></label>
<button type="submit">Save</button>
</form>
</body></html>
"#
    )
}

/// Errors decoding a form submission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FormError {
    /// A required field is absent.
    MissingField(&'static str),
    /// Malformed percent-encoding or non UTF-8 data.
    Encoding,
    /// The decoded credentials are not acceptable.
    Invalid(ConfigError),
}

impl fmt::Display for FormError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MissingField(name) => write!(f, "missing field: {}", name),
            Self::Encoding => write!(f, "malformed form encoding"),
            Self::Invalid(e) => write!(f, "{}", e),
        }
    }
}

impl std::error::Error for FormError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Invalid(e) => Some(e),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use terelina_esp32_macros::esp32_test;

    #[esp32_test]
    fn test_parse_plain_fields() {
        let creds = parse_credentials("ssid=Office&password=secret123").unwrap();
        assert_eq!(creds.ssid, "Office");
        assert_eq!(creds.password, "secret123");
    }

    #[esp32_test]
    fn test_parse_decodes_plus_and_percent() {
        let creds = parse_credentials("ssid=Caf%C3%A9+Wifi&password=p%26ss%3Dword").unwrap();
        assert_eq!(creds.ssid, "Café Wifi");
        assert_eq!(creds.password, "p&ss=word");
    }

    #[esp32_test]
    fn test_parse_field_order_and_extras() {
        let creds = parse_credentials("submit=Save&password=12345678&ssid=Lab").unwrap();
        assert_eq!(creds.ssid, "Lab");
    }

    #[esp32_test]
    fn test_parse_open_network() {
        let creds = parse_credentials("ssid=Guest&password=").unwrap();
        assert!(creds.is_open());
        let creds = parse_credentials("ssid=Guest").unwrap();
        assert!(creds.is_open());
    }

    #[esp32_test]
    fn test_parse_trims_ssid() {
        let creds = parse_credentials("ssid=+Office+&password=secret123").unwrap();
        assert_eq!(creds.ssid, "Office");
    }

    #[esp32_test]
    fn test_parse_errors() {
        assert_eq!(
            parse_credentials("password=secret123"),
            Err(FormError::MissingField("ssid"))
        );
        assert_eq!(
            parse_credentials("ssid=Office%2&password=x"),
            Err(FormError::Encoding)
        );
        assert_eq!(
            parse_credentials("ssid=%FF&password="),
            Err(FormError::Encoding)
        );
        assert_eq!(
            parse_credentials("ssid=&password=secret123"),
            Err(FormError::Invalid(ConfigError::SsidEmpty))
        );
        assert!(matches!(
            parse_credentials("ssid=Office&password=short"),
            Err(FormError::Invalid(ConfigError::PasswordTooShort { .. }))
        ));
    }

    #[esp32_test]
    fn test_page_contains_form_and_name() {
        let page = render_page("Terelina-3FA2", &PortalStatus::Waiting);
        assert!(page.contains("<h1>Terelina-3FA2</h1>"));
        assert!(page.contains(r#"action="/save""#));
        assert!(page.contains(r#"name="ssid""#));
        assert!(page.contains(r#"name="password""#));
        assert!(!page.contains("http-equiv"));
    }

    #[esp32_test]
    fn test_page_escapes_status() {
        let page = render_page(
            "Terelina-3FA2",
            &PortalStatus::Failed {
                reason: "<script>alert(1)</script>".into(),
            },
        );
        assert!(page.contains("&lt;script&gt;"));
        assert!(!page.contains("<script>"));
    }

    #[esp32_test]
    fn test_page_refreshes_while_connecting() {
        let page = render_page(
            "Terelina-3FA2",
            &PortalStatus::Connecting {
                ssid: "Office".into(),
            },
        );
        assert!(page.contains("http-equiv=\"refresh\""));
        assert!(page.contains("<b>Office</b>"));
    }
}
