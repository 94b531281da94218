use std::sync::OnceLock;

use regex::Regex;
use rust_decimal::Decimal;

use crate::asset::Asset;
use crate::error::ValidationError;

/// Structured interpretation of a free-text email body. One variant per
/// supported action, each carrying only its own fields.
#[derive(Debug, Clone, PartialEq)]
pub enum Intent {
    Send {
        amount: Decimal,
        asset: String,
        recipient: String,
    },
    Balance,
    Verify {
        code: String,
    },
    Unknown {
        raw: String,
    },
}

fn send_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)send\s+([\d.]+)\s+(\w+)\s+to\s+([\w._%+-]+@[\w.-]+\.\w+)").unwrap()
    })
}

fn verify_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)verify\s+(\d{6})").unwrap())
}

/// Parse an email body into an intent. Patterns are checked in priority
/// order send, balance, verify, unknown; only the first match wins. Returns
/// `None` when a send pattern matched but the amount is unusable.
pub fn parse(body: &str, sender: &str) -> Option<Intent> {
    let clean = body.trim().to_lowercase();

    if let Some(captures) = send_pattern().captures(&clean) {
        let amount_str = &captures[1];
        let amount = match amount_str.parse::<Decimal>() {
            Ok(amount) if amount > Decimal::ZERO => amount,
            _ => {
                tracing::warn!("invalid amount in email from {sender}: {amount_str}");
                return None;
            }
        };

        return Some(Intent::Send {
            amount,
            asset: captures[2].to_uppercase(),
            recipient: captures[3].to_lowercase(),
        });
    }

    if clean.contains("balance") {
        return Some(Intent::Balance);
    }

    if let Some(captures) = verify_pattern().captures(&clean) {
        return Some(Intent::Verify {
            code: captures[1].to_string(),
        });
    }

    let preview: String = body.chars().take(100).collect();
    tracing::warn!("could not parse intent from email: {preview}");
    Some(Intent::Unknown {
        raw: body.to_string(),
    })
}

/// Re-check domain rules on a parsed intent. Non-send intents carry nothing
/// to validate.
pub fn validate(intent: &Intent, sender: &str) -> Result<(), ValidationError> {
    if let Intent::Send {
        amount,
        asset,
        recipient,
    } = intent
    {
        if *amount <= Decimal::ZERO {
            return Err(ValidationError::InvalidAmount);
        }
        if recipient.is_empty() {
            return Err(ValidationError::MissingRecipient);
        }
        if recipient.eq_ignore_ascii_case(sender) {
            return Err(ValidationError::SelfTransfer);
        }
        if Asset::from_symbol(asset).is_none() {
            return Err(ValidationError::UnsupportedAsset(asset.clone()));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_mixed_case_send() {
        let intent = parse("SEND 5 pyusd to c@x.com", "a@x.com").unwrap();
        assert_eq!(
            intent,
            Intent::Send {
                amount: Decimal::from(5),
                asset: "PYUSD".to_string(),
                recipient: "c@x.com".to_string(),
            }
        );
    }

    #[test]
    fn parses_fractional_eth_send() {
        let intent = parse("please send 0.25 ETH to bob@example.org, thanks!", "a@x.com").unwrap();
        match intent {
            Intent::Send {
                amount,
                asset,
                recipient,
            } => {
                assert_eq!(amount, "0.25".parse::<Decimal>().unwrap());
                assert_eq!(asset, "ETH");
                assert_eq!(recipient, "bob@example.org");
            }
            other => panic!("expected send intent, got {other:?}"),
        }
    }

    #[test]
    fn rejects_zero_amount_send() {
        assert_eq!(parse("send 0 PYUSD to c@x.com", "a@x.com"), None);
    }

    #[test]
    fn parses_balance_request() {
        assert_eq!(parse("please check my balance", "a@x.com"), Some(Intent::Balance));
    }

    #[test]
    fn send_wins_over_balance_text() {
        let intent = parse("send 1 PYUSD to c@x.com and show my balance", "a@x.com").unwrap();
        assert!(matches!(intent, Intent::Send { .. }));
    }

    #[test]
    fn parses_verify_code() {
        let intent = parse("verify 123456", "a@x.com").unwrap();
        assert_eq!(
            intent,
            Intent::Verify {
                code: "123456".to_string()
            }
        );
    }

    #[test]
    fn verify_requires_six_digits() {
        let intent = parse("verify 1234", "a@x.com").unwrap();
        assert!(matches!(intent, Intent::Unknown { .. }));
    }

    #[test]
    fn unknown_carries_raw_text() {
        let intent = parse("hello there", "a@x.com").unwrap();
        assert_eq!(
            intent,
            Intent::Unknown {
                raw: "hello there".to_string()
            }
        );
    }

    #[test]
    fn validator_rejects_self_transfer() {
        let intent = Intent::Send {
            amount: Decimal::from(5),
            asset: "PYUSD".to_string(),
            recipient: "a@x.com".to_string(),
        };
        assert_eq!(
            validate(&intent, "A@X.com"),
            Err(ValidationError::SelfTransfer)
        );
    }

    #[test]
    fn validator_accepts_both_supported_assets() {
        for asset in ["ETH", "PYUSD"] {
            let intent = Intent::Send {
                amount: Decimal::from(1),
                asset: asset.to_string(),
                recipient: "b@x.com".to_string(),
            };
            assert!(validate(&intent, "a@x.com").is_ok());
        }
    }

    #[test]
    fn validator_rejects_unsupported_asset() {
        let intent = Intent::Send {
            amount: Decimal::from(1),
            asset: "DOGE".to_string(),
            recipient: "b@x.com".to_string(),
        };
        assert_eq!(
            validate(&intent, "a@x.com"),
            Err(ValidationError::UnsupportedAsset("DOGE".to_string()))
        );
    }

    #[test]
    fn validator_passes_non_send_intents() {
        assert!(validate(&Intent::Balance, "a@x.com").is_ok());
        assert!(validate(
            &Intent::Unknown {
                raw: "hi".to_string()
            },
            "a@x.com"
        )
        .is_ok());
    }
}
