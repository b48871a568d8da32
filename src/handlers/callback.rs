use std::collections::HashMap;

use axum::{
    body::Bytes,
    extract::{RawQuery, State},
    http::StatusCode,
    response::{Html, IntoResponse, Response},
};
use url::{form_urlencoded, Url};

use crate::domain::Transaction;
use crate::use_cases::CallbackOutcome;
use crate::validation::format_minor_units;
use crate::AppState;

/// `POST /callback`: the browser coming back from the gateway.
///
/// Always answers 200 with an HTML page; the counterparty is a browser.
/// Body fields win over query parameters of the same name.
pub async fn gateway_callback(
    State(state): State<AppState>,
    RawQuery(query): RawQuery,
    body: Bytes,
) -> Response {
    let mut fields: HashMap<String, String> = HashMap::new();
    if let Some(query) = query {
        fields.extend(form_urlencoded::parse(query.as_bytes()).into_owned());
    }
    fields.extend(form_urlencoded::parse(&body).into_owned());

    let outcome = state.callbacks.process(fields).await;

    (StatusCode::OK, Html(render(&outcome))).into_response()
}

pub fn render(outcome: &CallbackOutcome) -> String {
    match outcome {
        CallbackOutcome::Redirect { location, .. } => redirect_page(location),
        CallbackOutcome::Receipt(transaction) => receipt_page(transaction),
        CallbackOutcome::Rejected(message) => message_page(message),
    }
}

fn redirect_page(location: &Url) -> String {
    let href = escape_html(location.as_str());
    // JSON string literal, with `</` broken up so it cannot close the script.
    let script_target = serde_json::to_string(location.as_str())
        .unwrap_or_else(|_| "\"\"".to_string())
        .replace("</", "<\\/");

    format!(
        r#"<!DOCTYPE html>
<html>
<head>
<meta charset="utf-8">
<meta http-equiv="refresh" content="0;url={href}">
<title>Redirecting</title>
</head>
<body>
<p>Returning to the merchant. <a href="{href}">Continue</a> if nothing happens.</p>
<script>window.location.replace({script_target});</script>
</body>
</html>
"#
    )
}

fn receipt_page(transaction: &Transaction) -> String {
    let mut rows = vec![
        ("Transaction", escape_html(&transaction.id)),
        ("Status", transaction.status().as_str().to_string()),
        (
            "Amount",
            format!(
                "{} {}",
                format_minor_units(transaction.amount_minor),
                escape_html(&transaction.currency)
            ),
        ),
    ];
    if let Some(card_brand) = transaction.card_brand.as_deref() {
        rows.push(("Card", escape_html(card_brand)));
    }
    if let Some(auth_code) = transaction.auth_code.as_deref() {
        rows.push(("Authorization", escape_html(auth_code)));
    }

    let table: String = rows
        .iter()
        .map(|(label, value)| format!("<tr><th>{}</th><td>{}</td></tr>\n", label, value))
        .collect();

    format!(
        r#"<!DOCTYPE html>
<html>
<head>
<meta charset="utf-8">
<title>Payment receipt</title>
</head>
<body>
<h1>Payment receipt</h1>
<table>
{table}</table>
</body>
</html>
"#
    )
}

fn message_page(message: &str) -> String {
    format!(
        r#"<!DOCTYPE html>
<html>
<head>
<meta charset="utf-8">
<title>Payment</title>
</head>
<body>
<p>{}</p>
</body>
</html>
"#,
        escape_html(message)
    )
}

fn escape_html(raw: &str) -> String {
    let mut escaped = String::with_capacity(raw.len());
    for ch in raw.chars() {
        match ch {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#x27;"),
            other => escaped.push(other),
        }
    }
    escaped
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_escape_html() {
        assert_eq!(
            escape_html(r#"<a href="x">&'</a>"#),
            "&lt;a href=&quot;x&quot;&gt;&amp;&#x27;&lt;/a&gt;"
        );
    }

    #[test]
    fn test_redirect_page_has_refresh_and_script() {
        let location = Url::parse("https://shop.example.com/done?status=approved&amount=25.00").unwrap();
        let page = redirect_page(&location);

        assert!(page.contains(
            r#"content="0;url=https://shop.example.com/done?status=approved&amp;amount=25.00""#
        ));
        assert!(page.contains(
            r#"window.location.replace("https://shop.example.com/done?status=approved&amount=25.00")"#
        ));
    }

    #[test]
    fn test_message_page_is_escaped() {
        let page = message_page("<script>alert(1)</script>");
        assert!(!page.contains("<script>alert"));
        assert!(page.contains("&lt;script&gt;"));
    }
}
