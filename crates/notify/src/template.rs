//! Message templates.
//!
//! Rendering is pure and total: unknown keys get a generic text and missing
//! or malformed fields fall back to placeholders.

use std::{convert::Infallible, fmt, str::FromStr};

use serde_json::Value;

/// Text sent for a key the renderer does not know.
pub const FALLBACK_TEXT: &str = "Notifikasi dari Portal RT.";

const DEFAULT_OTP_TTL_MINUTES: u64 = 10;

/// Known notification templates.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum TemplateKey {
    WalletTopupSubmitted,
    WalletTopupNeedsApproval,
    WalletTopupApproved,
    WalletTopupRejected,
    KasRtDebitSuccess,
    KasRtDebitInsufficient,
    FeePaymentSubmitted,
    FeePaymentNeedsApproval,
    FeePaymentApproved,
    FeePaymentRejected,
    FeeBillingReminder,
    PhoneOtpCode,
    ResidentRegistered,
    /// Anything else; rendered as [`FALLBACK_TEXT`].
    Other(String),
}

impl TemplateKey {
    pub const KNOWN: [Self; 13] = [
        Self::WalletTopupSubmitted,
        Self::WalletTopupNeedsApproval,
        Self::WalletTopupApproved,
        Self::WalletTopupRejected,
        Self::KasRtDebitSuccess,
        Self::KasRtDebitInsufficient,
        Self::FeePaymentSubmitted,
        Self::FeePaymentNeedsApproval,
        Self::FeePaymentApproved,
        Self::FeePaymentRejected,
        Self::FeeBillingReminder,
        Self::PhoneOtpCode,
        Self::ResidentRegistered,
    ];

    /// Key as stored in the outbox.
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::WalletTopupSubmitted => "WalletTopupSubmitted",
            Self::WalletTopupNeedsApproval => "WalletTopupNeedsApproval",
            Self::WalletTopupApproved => "WalletTopupApproved",
            Self::WalletTopupRejected => "WalletTopupRejected",
            Self::KasRtDebitSuccess => "KasRtDebitSuccess",
            Self::KasRtDebitInsufficient => "KasRtDebitInsufficient",
            Self::FeePaymentSubmitted => "FeePaymentSubmitted",
            Self::FeePaymentNeedsApproval => "FeePaymentNeedsApproval",
            Self::FeePaymentApproved => "FeePaymentApproved",
            Self::FeePaymentRejected => "FeePaymentRejected",
            Self::FeeBillingReminder => "FeeBillingReminder",
            Self::PhoneOtpCode => "PhoneOtpCode",
            Self::ResidentRegistered => "RESIDENT_REGISTERED",
            Self::Other(key) => key,
        }
    }

    #[must_use]
    pub fn is_known(&self) -> bool {
        !matches!(self, Self::Other(_))
    }

    /// Render the message text for `payload`.
    #[must_use]
    pub fn render(&self, payload: &Value) -> String {
        let amount = || format_rupiah(payload.get("amount"));
        let campaign = || field_or(payload, "campaignName", "iuran");
        let resident = || field_or(payload, "residentName", "warga");

        match self {
            Self::WalletTopupSubmitted => format!(
                "Topup deposit {} sudah kami terima. RT: {}. Menunggu verifikasi.",
                amount(),
                field_or(payload, "rtName", "-"),
            ),
            Self::WalletTopupNeedsApproval => format!(
                "Topup baru dari {} sebesar {}. Mohon approval.",
                resident(),
                amount(),
            ),
            Self::WalletTopupApproved => "Topup Anda telah disetujui. Terima kasih.".into(),
            Self::WalletTopupRejected => "Topup Anda ditolak. Silakan hubungi pengurus RT.".into(),
            Self::KasRtDebitSuccess => {
                format!("Kas RT berhasil didebit sebesar {}.", amount())
            },
            Self::KasRtDebitInsufficient => format!(
                "Saldo tidak cukup untuk kas RT sebesar {}. Mohon topup.",
                amount()
            ),
            Self::FeePaymentSubmitted => format!(
                "Bukti iuran {} sebesar {} sudah diterima. Menunggu verifikasi.",
                campaign(),
                amount(),
            ),
            Self::FeePaymentNeedsApproval => format!(
                "Pembayaran iuran {} dari {} sebesar {} menunggu approval.",
                campaign(),
                resident(),
                amount(),
            ),
            Self::FeePaymentApproved => format!(
                "Pembayaran iuran {} sebesar {} sudah disetujui. Terima kasih.",
                campaign(),
                amount(),
            ),
            Self::FeePaymentRejected => format!(
                "Pembayaran iuran {} ditolak. Silakan hubungi pengurus RT.",
                campaign()
            ),
            Self::FeeBillingReminder => {
                let period = text_field(payload, "period")
                    .map(|p| format!(" periode {p}"))
                    .unwrap_or_default();
                format!(
                    "Reminder iuran {}{period} sebesar {} belum dibayar.",
                    campaign(),
                    amount(),
                )
            },
            Self::PhoneOtpCode => format!(
                "Kode OTP Portal RT: {}. Berlaku {} menit.",
                field_or(payload, "code", "-"),
                otp_ttl(payload),
            ),
            Self::ResidentRegistered => "Terima kasih, pendaftaran Anda sudah diterima. Status \
                                         akun menunggu approval RT."
                .into(),
            Self::Other(_) => FALLBACK_TEXT.into(),
        }
    }
}

impl FromStr for TemplateKey {
    type Err = Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self::KNOWN
            .into_iter()
            .find(|k| k.as_str() == s)
            .unwrap_or_else(|| Self::Other(s.to_string())))
    }
}

impl From<&str> for TemplateKey {
    fn from(s: &str) -> Self {
        match s.parse() {
            Ok(key) => key,
            Err(never) => match never {},
        }
    }
}

impl fmt::Display for TemplateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Render `template_key` with `payload`.
#[must_use]
pub fn render(template_key: &str, payload: &Value) -> String {
    TemplateKey::from(template_key).render(payload)
}

/// Non-empty string (or number) field.
fn text_field(payload: &Value, key: &str) -> Option<String> {
    match payload.get(key)? {
        Value::String(s) if !s.trim().is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn field_or(payload: &Value, key: &str, fallback: &str) -> String {
    text_field(payload, key).unwrap_or_else(|| fallback.to_string())
}

fn otp_ttl(payload: &Value) -> u64 {
    let ttl = match payload.get("ttlMinutes") {
        Some(Value::Number(n)) => n.as_u64(),
        Some(Value::String(s)) => s.trim().parse().ok(),
        _ => None,
    };
    ttl.filter(|m| *m > 0).unwrap_or(DEFAULT_OTP_TTL_MINUTES)
}

/// Format an amount the way the portal shows rupiah: `Rp 1.500.000`,
/// `Rp 12.345,5`. Numbers and numeric strings are accepted; anything else
/// renders as `Rp 0`.
#[must_use]
pub fn format_rupiah(value: Option<&Value>) -> String {
    let amount = match value {
        Some(Value::Number(n)) => n.as_f64(),
        Some(Value::String(s)) if s.trim().is_empty() => Some(0.0),
        Some(Value::String(s)) => s.trim().parse::<f64>().ok(),
        _ => None,
    }
    .filter(|v| v.is_finite())
    .unwrap_or(0.0);

    // id-ID shows at most three fraction digits.
    let fixed = format!("{:.3}", amount.abs());
    let (int_part, frac_part) = fixed.split_once('.').unwrap_or((fixed.as_str(), ""));
    let frac = frac_part.trim_end_matches('0');

    let mut grouped = String::with_capacity(int_part.len() + int_part.len() / 3);
    for (i, ch) in int_part.chars().enumerate() {
        if i > 0 && (int_part.len() - i) % 3 == 0 {
            grouped.push('.');
        }
        grouped.push(ch);
    }

    let sign = if amount < 0.0 && (int_part != "0" || !frac.is_empty()) {
        "-"
    } else {
        ""
    };
    if frac.is_empty() {
        format!("Rp {sign}{grouped}")
    } else {
        format!("Rp {sign}{grouped},{frac}")
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {super::*, rstest::rstest, serde_json::json};

    #[rstest]
    #[case(json!(0), "Rp 0")]
    #[case(json!(500), "Rp 500")]
    #[case(json!(1500), "Rp 1.500")]
    #[case(json!(1500000), "Rp 1.500.000")]
    #[case(json!(123456789), "Rp 123.456.789")]
    #[case(json!(12345.5), "Rp 12.345,5")]
    #[case(json!(0.1234), "Rp 0,123")]
    #[case(json!(-25000), "Rp -25.000")]
    #[case(json!("75000"), "Rp 75.000")]
    #[case(json!(" 2000 "), "Rp 2.000")]
    #[case(json!(""), "Rp 0")]
    #[case(json!("lima ribu"), "Rp 0")]
    #[case(json!(null), "Rp 0")]
    #[case(json!(true), "Rp 0")]
    fn rupiah(#[case] value: Value, #[case] expected: &str) {
        assert_eq!(format_rupiah(Some(&value)), expected);
    }

    #[test]
    fn rupiah_missing() {
        assert_eq!(format_rupiah(None), "Rp 0");
    }

    #[rstest]
    #[case(
        "WalletTopupSubmitted",
        json!({"amount": 50000, "rtName": "RT 05"}),
        "Topup deposit Rp 50.000 sudah kami terima. RT: RT 05. Menunggu verifikasi."
    )]
    #[case(
        "WalletTopupSubmitted",
        json!({}),
        "Topup deposit Rp 0 sudah kami terima. RT: -. Menunggu verifikasi."
    )]
    #[case(
        "WalletTopupNeedsApproval",
        json!({"amount": "100000", "residentName": "Budi"}),
        "Topup baru dari Budi sebesar Rp 100.000. Mohon approval."
    )]
    #[case(
        "WalletTopupNeedsApproval",
        json!({"residentName": ""}),
        "Topup baru dari warga sebesar Rp 0. Mohon approval."
    )]
    #[case("WalletTopupApproved", json!({"status": "APPROVED"}), "Topup Anda telah disetujui. Terima kasih.")]
    #[case("WalletTopupRejected", json!({}), "Topup Anda ditolak. Silakan hubungi pengurus RT.")]
    #[case("KasRtDebitSuccess", json!({"amount": 20000}), "Kas RT berhasil didebit sebesar Rp 20.000.")]
    #[case(
        "KasRtDebitInsufficient",
        json!({"amount": 20000}),
        "Saldo tidak cukup untuk kas RT sebesar Rp 20.000. Mohon topup."
    )]
    #[case(
        "FeePaymentSubmitted",
        json!({"amount": 15000, "campaignName": "Kebersihan"}),
        "Bukti iuran Kebersihan sebesar Rp 15.000 sudah diterima. Menunggu verifikasi."
    )]
    #[case(
        "FeePaymentNeedsApproval",
        json!({"amount": 15000}),
        "Pembayaran iuran iuran dari warga sebesar Rp 15.000 menunggu approval."
    )]
    #[case(
        "FeePaymentApproved",
        json!({"amount": 15000, "campaignName": "Keamanan"}),
        "Pembayaran iuran Keamanan sebesar Rp 15.000 sudah disetujui. Terima kasih."
    )]
    #[case(
        "FeePaymentRejected",
        json!({"campaignName": "Keamanan"}),
        "Pembayaran iuran Keamanan ditolak. Silakan hubungi pengurus RT."
    )]
    #[case(
        "FeeBillingReminder",
        json!({"amount": 25000, "campaignName": "Kebersihan", "period": "2026-10"}),
        "Reminder iuran Kebersihan periode 2026-10 sebesar Rp 25.000 belum dibayar."
    )]
    #[case(
        "FeeBillingReminder",
        json!({"amount": 25000}),
        "Reminder iuran iuran sebesar Rp 25.000 belum dibayar."
    )]
    #[case("PhoneOtpCode", json!({"code": "482913", "ttlMinutes": 5}), "Kode OTP Portal RT: 482913. Berlaku 5 menit.")]
    #[case("PhoneOtpCode", json!({"code": "482913"}), "Kode OTP Portal RT: 482913. Berlaku 10 menit.")]
    #[case("PhoneOtpCode", json!({"code": 1234, "ttlMinutes": 0}), "Kode OTP Portal RT: 1234. Berlaku 10 menit.")]
    #[case(
        "RESIDENT_REGISTERED",
        json!({"residentName": "Siti"}),
        "Terima kasih, pendaftaran Anda sudah diterima. Status akun menunggu approval RT."
    )]
    #[case("Unknown", json!({}), FALLBACK_TEXT)]
    #[case("", json!({"amount": 1}), FALLBACK_TEXT)]
    fn renders(#[case] key: &str, #[case] payload: Value, #[case] expected: &str) {
        assert_eq!(render(key, &payload), expected);
    }

    #[test]
    fn keys_roundtrip() {
        for key in TemplateKey::KNOWN {
            assert_eq!(TemplateKey::from(key.as_str()), key);
            assert!(key.is_known());
        }
        let other = TemplateKey::from("SomethingNew");
        assert_eq!(other, TemplateKey::Other("SomethingNew".into()));
        assert_eq!(other.to_string(), "SomethingNew");
        assert!(!other.is_known());
    }

    #[test]
    fn key_lookup_is_case_sensitive() {
        assert!(!TemplateKey::from("resident_registered").is_known());
    }
}
