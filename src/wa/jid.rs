/// WhatsApp JID helpers.
///
/// JIDs look like `6285179971457:52@s.whatsapp.net`: phone number, optional
/// device suffix, server host.
const USER_SERVER: &str = "s.whatsapp.net";

/// Extracts the phone number from a JID and formats it as E.164 with a
/// leading `+`. Accepts bare numbers (with or without `+`) as well.
///
/// Returns `None` when the input carries no digits before the `:`/`@`
/// separators. Idempotent: feeding the output back yields the same value.
pub fn format_phone_number(jid: &str) -> Option<String> {
    let raw = jid.split(['@', ':']).next()?.trim();
    let digits = raw.strip_prefix('+').unwrap_or(raw);

    if digits.is_empty() || !digits.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }

    Some(format!("+{digits}"))
}

/// Normalizes a caller-supplied recipient into a full JID.
///
/// Group and broadcast JIDs (anything already containing `@`) pass through
/// unchanged; bare phone numbers become `<digits>@s.whatsapp.net`.
pub fn to_jid(recipient: &str) -> Option<String> {
    let trimmed = recipient.trim();
    if trimmed.is_empty() {
        return None;
    }

    if trimmed.contains('@') {
        return Some(trimmed.to_owned());
    }

    let digits = trimmed.strip_prefix('+').unwrap_or(trimmed);
    if digits.is_empty() || !digits.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }

    Some(format!("{digits}@{USER_SERVER}"))
}
