//! Typed notification intents raised by the portal's business flows.

use serde_json::{Map, Value, json};

use crate::template::TemplateKey;

/// Outcome of an approval step, as the portal records it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Approved,
    Rejected,
}

impl Decision {
    fn as_str(self) -> &'static str {
        match self {
            Self::Approved => "APPROVED",
            Self::Rejected => "REJECTED",
        }
    }
}

/// One business event worth a message. Amounts are whole rupiah.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notification {
    /// To the resident who submitted a wallet top-up.
    TopupSubmitted {
        amount: i64,
        rt_name: Option<String>,
    },
    /// To each RT admin and treasurer.
    TopupNeedsApproval {
        amount: i64,
        resident_name: Option<String>,
    },
    TopupDecided {
        decision: Decision,
    },
    /// Monthly kas RT debit from the resident's wallet.
    KasDebit {
        amount: i64,
        paid: bool,
    },
    FeePaymentSubmitted {
        amount: i64,
        campaign_name: Option<String>,
    },
    FeePaymentNeedsApproval {
        amount: i64,
        resident_name: Option<String>,
        campaign_name: Option<String>,
    },
    FeePaymentDecided {
        decision: Decision,
        amount: i64,
        campaign_name: Option<String>,
    },
    FeeBillingReminder {
        amount: i64,
        campaign_name: Option<String>,
        period: Option<String>,
    },
    PhoneOtp {
        code: String,
        ttl_minutes: u32,
    },
    ResidentRegistered {
        resident_name: Option<String>,
    },
}

impl Notification {
    #[must_use]
    pub fn template_key(&self) -> TemplateKey {
        match self {
            Self::TopupSubmitted { .. } => TemplateKey::WalletTopupSubmitted,
            Self::TopupNeedsApproval { .. } => TemplateKey::WalletTopupNeedsApproval,
            Self::TopupDecided {
                decision: Decision::Approved,
            } => TemplateKey::WalletTopupApproved,
            Self::TopupDecided {
                decision: Decision::Rejected,
            } => TemplateKey::WalletTopupRejected,
            Self::KasDebit { paid: true, .. } => TemplateKey::KasRtDebitSuccess,
            Self::KasDebit { paid: false, .. } => TemplateKey::KasRtDebitInsufficient,
            Self::FeePaymentSubmitted { .. } => TemplateKey::FeePaymentSubmitted,
            Self::FeePaymentNeedsApproval { .. } => TemplateKey::FeePaymentNeedsApproval,
            Self::FeePaymentDecided {
                decision: Decision::Approved,
                ..
            } => TemplateKey::FeePaymentApproved,
            Self::FeePaymentDecided {
                decision: Decision::Rejected,
                ..
            } => TemplateKey::FeePaymentRejected,
            Self::FeeBillingReminder { .. } => TemplateKey::FeeBillingReminder,
            Self::PhoneOtp { .. } => TemplateKey::PhoneOtpCode,
            Self::ResidentRegistered { .. } => TemplateKey::ResidentRegistered,
        }
    }

    /// Template fields, camelCase. Absent optionals are left out.
    #[must_use]
    pub fn payload(&self) -> Value {
        let raw = match self {
            Self::TopupSubmitted { amount, rt_name } => {
                json!({ "amount": amount, "rtName": rt_name })
            },
            Self::TopupNeedsApproval {
                amount,
                resident_name,
            } => json!({ "amount": amount, "residentName": resident_name }),
            Self::TopupDecided { decision } => json!({ "status": decision.as_str() }),
            Self::KasDebit { amount, paid } => json!({
                "amount": amount,
                "status": if *paid { "PAID" } else { "INSUFFICIENT" },
            }),
            Self::FeePaymentSubmitted {
                amount,
                campaign_name,
            } => json!({ "amount": amount, "campaignName": campaign_name }),
            Self::FeePaymentNeedsApproval {
                amount,
                resident_name,
                campaign_name,
            } => json!({
                "amount": amount,
                "residentName": resident_name,
                "campaignName": campaign_name,
            }),
            Self::FeePaymentDecided {
                decision,
                amount,
                campaign_name,
            } => json!({
                "status": decision.as_str(),
                "amount": amount,
                "campaignName": campaign_name,
            }),
            Self::FeeBillingReminder {
                amount,
                campaign_name,
                period,
            } => json!({
                "amount": amount,
                "campaignName": campaign_name,
                "period": period,
            }),
            Self::PhoneOtp { code, ttl_minutes } => {
                json!({ "code": code, "ttlMinutes": ttl_minutes })
            },
            Self::ResidentRegistered { resident_name } => {
                json!({ "residentName": resident_name })
            },
        };
        strip_nulls(raw)
    }

    /// Rendered text, as the worker would send it.
    #[must_use]
    pub fn render(&self) -> String {
        self.template_key().render(&self.payload())
    }
}

fn strip_nulls(value: Value) -> Value {
    match value {
        Value::Object(map) => Value::Object(
            map.into_iter()
                .filter(|(_, v)| !v.is_null())
                .collect::<Map<String, Value>>(),
        ),
        other => other,
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {super::*, rstest::rstest};

    #[rstest]
    #[case(
        Notification::TopupDecided { decision: Decision::Approved },
        TemplateKey::WalletTopupApproved
    )]
    #[case(
        Notification::TopupDecided { decision: Decision::Rejected },
        TemplateKey::WalletTopupRejected
    )]
    #[case(Notification::KasDebit { amount: 1, paid: true }, TemplateKey::KasRtDebitSuccess)]
    #[case(Notification::KasDebit { amount: 1, paid: false }, TemplateKey::KasRtDebitInsufficient)]
    #[case(
        Notification::FeePaymentDecided {
            decision: Decision::Rejected,
            amount: 1,
            campaign_name: None,
        },
        TemplateKey::FeePaymentRejected
    )]
    #[case(
        Notification::ResidentRegistered { resident_name: None },
        TemplateKey::ResidentRegistered
    )]
    fn maps_to_template(#[case] intent: Notification, #[case] key: TemplateKey) {
        assert_eq!(intent.template_key(), key);
    }

    #[test]
    fn payload_omits_missing_optionals() {
        let intent = Notification::FeeBillingReminder {
            amount: 25_000,
            campaign_name: Some("Kebersihan".into()),
            period: None,
        };
        assert_eq!(
            intent.payload(),
            json!({ "amount": 25_000, "campaignName": "Kebersihan" })
        );
    }

    #[test]
    fn renders_through_template() {
        let intent = Notification::TopupNeedsApproval {
            amount: 150_000,
            resident_name: Some("Budi".into()),
        };
        assert_eq!(
            intent.render(),
            "Topup baru dari Budi sebesar Rp 150.000. Mohon approval."
        );

        let otp = Notification::PhoneOtp {
            code: "048213".into(),
            ttl_minutes: 5,
        };
        assert_eq!(otp.render(), "Kode OTP Portal RT: 048213. Berlaku 5 menit.");
    }
}
