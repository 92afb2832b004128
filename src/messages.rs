use serde::Serialize;

pub const DEFAULT_BILLING_TEMPLATE: &str =
    "Hi {name}! This is {gym}. Your {month} fee of {amount} is due on {dueDate}. Thank you!";
pub const DEFAULT_LEAD_TEMPLATE: &str =
    "Hi {name}! Thanks for your interest in {gym}. Your trial class is on {date}. See you there!";
pub const DEFAULT_RECEIPT_TEMPLATE: &str =
    "Hi {name}! {gym} paid your {month} commission of {amount}.";

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    pub phone: String,
    pub text: String,
    pub link: String,
}

/// Replaces each `{key}`; unknown placeholders are left as typed.
pub fn render(template: &str, vars: &[(&str, &str)]) -> String {
    let mut out = template.to_string();
    for (k, v) in vars {
        out = out.replace(&format!("{{{}}}", k), v);
    }
    out
}

/// Digits only, prefixed with the country code unless the number already
/// carries it (more than 11 digits, or an explicit leading `+`).
pub fn normalize_phone(raw: &str, country_code: &str) -> Option<String> {
    let digits: String = raw.chars().filter(|c| c.is_ascii_digit()).collect();
    if digits.len() < 8 {
        return None;
    }
    let explicit = raw.trim_start().starts_with('+');
    if explicit || digits.len() > 11 {
        return Some(digits);
    }
    let cc: String = country_code.chars().filter(|c| c.is_ascii_digit()).collect();
    Some(format!("{}{}", cc, digits))
}

pub fn compose(raw_phone: &str, country_code: &str, text: String) -> Option<ChatMessage> {
    let phone = normalize_phone(raw_phone, country_code)?;
    let link = format!("https://wa.me/{}?text={}", phone, urlencoding::encode(&text));
    Some(ChatMessage { phone, text, link })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn render_fills_known_placeholders() {
        let t = render(
            DEFAULT_BILLING_TEMPLATE,
            &[
                ("name", "Bia"),
                ("gym", "Arena"),
                ("month", "2025-03"),
                ("amount", "150.00"),
                ("dueDate", "2025-03-10"),
            ],
        );
        assert_eq!(
            t,
            "Hi Bia! This is Arena. Your 2025-03 fee of 150.00 is due on 2025-03-10. Thank you!"
        );
        assert_eq!(render("{x} {name}", &[("name", "A")]), "{x} A");
    }

    #[test]
    fn phone_gets_country_code_once() {
        assert_eq!(normalize_phone("(11) 98765-4321", "55").as_deref(), Some("5511987654321"));
        assert_eq!(normalize_phone("+55 11 98765-4321", "55").as_deref(), Some("5511987654321"));
        assert_eq!(normalize_phone("5511987654321", "55").as_deref(), Some("5511987654321"));
        assert_eq!(normalize_phone("123", "55"), None);
    }

    #[test]
    fn link_is_percent_encoded() {
        let msg = compose("11 98765-4321", "55", "Oi Bia & cia".to_string()).expect("message");
        assert_eq!(msg.link, "https://wa.me/5511987654321?text=Oi%20Bia%20%26%20cia");
    }
}
