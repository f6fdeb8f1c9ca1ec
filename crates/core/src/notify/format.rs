//! Human-readable message bodies for the notification channel.

use crate::domain::recommendation::Recommendation;
use crate::notify::{CallbackAction, MessageAction, OutboundMessage};
use chrono::Duration;

pub fn approval_prompt(
    rec: &Recommendation,
    recipient: &str,
    window: Duration,
    public_base_url: Option<&str>,
) -> OutboundMessage {
    let mut lines = Vec::new();
    lines.push(format!("{} {} for ${:.2}", rec.action, rec.ticker, rec.notional));
    if let Some(qty) = rec.quantity {
        lines.push(format!("Quantity: {qty}"));
    }
    match (rec.stop_price, rec.take_profit) {
        (Some(stop), Some(tp)) => lines.push(format!("Bracket: stop ${stop:.2} / take-profit ${tp:.2}")),
        _ => lines.push("Plain market order".to_string()),
    }
    if !rec.rationale.is_empty() {
        lines.push(String::new());
        lines.push(rec.rationale.clone());
    }
    lines.push(String::new());
    lines.push(format!(
        "Expires {} UTC",
        rec.expires_at(window).format("%Y-%m-%d %H:%M")
    ));

    if let Some(base) = public_base_url {
        let base = base.trim_end_matches('/');
        lines.push(format!("Approve: {base}/recommendations/{}/approve", rec.id));
        lines.push(format!("Reject: {base}/recommendations/{}/reject", rec.id));
    }

    OutboundMessage {
        recipient: recipient.to_string(),
        text: lines.join("\n"),
        actions: vec![
            MessageAction::for_recommendation(CallbackAction::Approve, rec.id),
            MessageAction::for_recommendation(CallbackAction::Reject, rec.id),
        ],
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::decision::Action;
    use crate::domain::recommendation::NewRecommendation;
    use crate::notify::parse_callback_data;
    use chrono::{TimeZone, Utc};

    fn rec() -> Recommendation {
        let now = Utc.with_ymd_and_hms(2026, 1, 27, 14, 0, 0).unwrap();
        Recommendation::pending(
            NewRecommendation {
                ticker: "ACME".to_string(),
                action: Action::Buy,
                rationale: "Two directors bought this week.".to_string(),
                signal_id: Some(7),
                notional: 1500.0,
                quantity: None,
                stop_price: Some(9.0),
                take_profit: Some(14.0),
            },
            now,
        )
    }

    #[test]
    fn prompt_carries_both_actions_for_the_recommendation() {
        let r = rec();
        let msg = approval_prompt(&r, "42", Duration::minutes(60), None);
        assert_eq!(msg.recipient, "42");
        assert_eq!(msg.actions.len(), 2);
        assert_eq!(
            parse_callback_data(&msg.actions[0].data),
            Some((CallbackAction::Approve, r.id))
        );
        assert_eq!(
            parse_callback_data(&msg.actions[1].data),
            Some((CallbackAction::Reject, r.id))
        );
        assert!(msg.text.starts_with("BUY ACME for $1500.00"));
        assert!(msg.text.contains("Expires 2026-01-27 15:00 UTC"));
        assert!(msg.text.contains("stop $9.00 / take-profit $14.00"));
    }

    #[test]
    fn prompt_includes_links_when_public_url_is_set() {
        let r = rec();
        let msg = approval_prompt(&r, "42", Duration::minutes(60), Some("https://desk.example/"));
        assert!(msg
            .text
            .contains(&format!("https://desk.example/recommendations/{}/approve", r.id)));
    }
}
