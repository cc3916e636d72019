//! Registration pages: the form and the confirmation echo.

use crate::tenant::{redact, TenantRecord};

pub(crate) const REGISTER_FORM: &str = r#"<!doctype html>
<html>
<head><meta charset="utf-8"><title>Register bot</title></head>
<body>
<form method="POST">
    <label for="line_channel_id">Line Channel ID:</label><br>
    <input type="text" id="line_channel_id" name="line_channel_id"><br><br>
    <label for="line_channel_secret">Line Channel Secret:</label><br>
    <input type="password" id="line_channel_secret" name="line_channel_secret"><br><br>
    <label for="line_channel_access_token">Line Channel Access Token:</label><br>
    <input type="password" id="line_channel_access_token" name="line_channel_access_token"><br><br>
    <label for="coze_bot_id">Coze Bot ID:</label><br>
    <input type="text" id="coze_bot_id" name="coze_bot_id"><br><br>
    <label for="coze_api_key">Coze API Key:</label><br>
    <input type="password" id="coze_api_key" name="coze_api_key"><br><br>
    <label for="cloud_storage_bucket_name">Cloud Storage Bucket Name:</label><br>
    <input type="text" id="cloud_storage_bucket_name" name="cloud_storage_bucket_name"><br><br>
    <input type="submit" value="Submit">
</form>
</body>
</html>
"#;

/// Escape text for inclusion in HTML element content or a quoted attribute.
pub(crate) fn escape_html(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
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

/// Confirmation page for a stored record. Secrets are redacted.
pub(crate) fn confirmation_html(record: &TenantRecord) -> String {
    let c = &record.credentials;
    let url = escape_html(&record.callback_url);
    format!(
        r#"<!doctype html>
<html>
<head><meta charset="utf-8"><title>Bot registered</title></head>
<body>
<p>Line Channel ID: {}</p>
<p>Line Channel Secret: {}</p>
<p>Line Channel Access Token: {}</p>
<p>Coze Bot ID: {}</p>
<p>Coze API Key: {}</p>
<p>Cloud Storage Bucket Name: {}</p>
<p>Webhook URL: <a href="{url}">{url}</a></p>
</body>
</html>
"#,
        escape_html(&c.line_channel_id),
        escape_html(&redact(&c.line_channel_secret)),
        escape_html(&redact(&c.line_channel_access_token)),
        escape_html(&c.coze_bot_id),
        escape_html(&redact(&c.coze_api_key)),
        escape_html(&c.cloud_storage_bucket_name),
        url = url,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tenant::RegistrationForm;

    #[test]
    fn escapes_markup() {
        assert_eq!(
            escape_html(r#"<a href="x">&'</a>"#),
            "&lt;a href=&quot;x&quot;&gt;&amp;&#39;&lt;/a&gt;"
        );
    }

    #[test]
    fn confirmation_redacts_and_escapes() {
        let form = RegistrationForm {
            line_channel_id: "<script>".to_string(),
            line_channel_secret: "supersecretvalue".to_string(),
            line_channel_access_token: "tokenvalue123".to_string(),
            coze_bot_id: "bot".to_string(),
            coze_api_key: "pat_0123456789".to_string(),
            cloud_storage_bucket_name: "bucket".to_string(),
        };
        let record = TenantRecord::new(form.into(), "https://relay.example.com");
        let html = confirmation_html(&record);
        assert!(!html.contains("supersecretvalue"));
        assert!(!html.contains("tokenvalue123"));
        assert!(!html.contains("pat_0123456789"));
        assert!(html.contains("supe"));
        assert!(!html.contains("<script>"));
        assert!(html.contains("https://relay.example.com/api/&lt;script&gt;"));
    }
}
