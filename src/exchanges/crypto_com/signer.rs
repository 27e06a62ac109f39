use std::fmt;

use hmac::{Hmac, Mac};
use serde_json::{Map, Value};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// API key and secret of one exchange user.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub api_key: String,
    api_secret: String,
}

impl Credentials {
    pub fn new(api_key: impl Into<String>, api_secret: impl Into<String>) -> Self {
        Credentials {
            api_key: api_key.into(),
            api_secret: api_secret.into(),
        }
    }

    pub fn sign(
        &self,
        method: &str,
        id: i64,
        params: Option<&Map<String, Value>>,
        nonce: i64,
    ) -> String {
        sign(method, id, &self.api_key, params, nonce, &self.api_secret)
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("api_key", &self.api_key)
            .field("api_secret", &"<redacted>")
            .finish()
    }
}

/// Hex HMAC-SHA256 of `method + id + api_key + param_string + nonce`.
pub fn sign(
    method: &str,
    id: i64,
    api_key: &str,
    params: Option<&Map<String, Value>>,
    nonce: i64,
    api_secret: &str,
) -> String {
    let payload = format!(
        "{}{}{}{}{}",
        method,
        id,
        api_key,
        param_string(params),
        nonce
    );
    let mut mac =
        HmacSha256::new_from_slice(api_secret.as_bytes()).expect("HMAC can take key of any size");
    mac.update(payload.as_bytes());
    hex::encode(mac.finalize().into_bytes())
}

/// Concatenates `key + value` with keys in alphabetical order.
///
/// The exchange rebuilds this string the same way, so insertion order of the
/// params map must not leak into it.
pub fn param_string(params: Option<&Map<String, Value>>) -> String {
    let mut out = String::new();
    if let Some(params) = params {
        write_object(params, &mut out);
    }
    out
}

fn write_object(map: &Map<String, Value>, out: &mut String) {
    let mut keys: Vec<&String> = map.keys().collect();
    keys.sort();
    for key in keys {
        out.push_str(key);
        write_value(&map[key.as_str()], out);
    }
}

fn write_value(value: &Value, out: &mut String) {
    match value {
        Value::Null => out.push_str("null"),
        Value::String(s) => out.push_str(s),
        Value::Bool(b) => out.push_str(if *b { "true" } else { "false" }),
        Value::Number(n) => out.push_str(&n.to_string()),
        Value::Array(items) => {
            for item in items {
                write_value(item, out);
            }
        }
        Value::Object(map) => write_object(map, out),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::json;

    fn params(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn test_known_signature() {
        let p = params(json!({"order_id": "337843775021233500"}));
        let sig = sign(
            "private/get-order-detail",
            11,
            "token",
            Some(&p),
            1587846358253,
            "secretKey",
        );
        assert_eq!(
            sig,
            "36eab774dfb6f67ea37711799f16a88d1ac01ebccdcc87b7a3ef700a335fe883"
        );
    }

    #[test]
    fn test_auth_signature_without_params() {
        let sig = sign("public/auth", 1, "token", None, 1587846358253, "secretKey");
        assert_eq!(
            sig,
            "4e39e4b1d0b0f601b5673ad78c981489181f091e919ac08892c4fe35d47336bf"
        );
    }

    #[test]
    fn test_params_are_sorted_by_key() {
        let p = params(json!({
            "side": "BUY",
            "quantity": 0.01,
            "instrument_name": "BTC_USDT",
            "price": 20000.5
        }));
        assert_eq!(
            param_string(Some(&p)),
            "instrument_nameBTC_USDTprice20000.5quantity0.01sideBUY"
        );
        let sig = sign("private/create-order", 3, "key", Some(&p), 1600000000000, "sec");
        assert_eq!(
            sig,
            "4d6d5cfc5f6c0de57c79d00b876edb34d6f5d821fb8d5098b9265a833707d9a8"
        );
    }

    #[test]
    fn test_nested_params() {
        let p = params(json!({"channels": ["user.balance", "ticker.CRO_USDT"], "b": {"y": 1, "x": null}}));
        assert_eq!(
            param_string(Some(&p)),
            "bxnully1channelsuser.balanceticker.CRO_USDT"
        );
    }

    #[test]
    fn test_debug_hides_secret() {
        let creds = Credentials::new("key", "very-secret");
        assert!(!format!("{:?}", creds).contains("very-secret"));
    }

    proptest! {
        #[test]
        fn signature_is_deterministic_and_input_sensitive(
            method in "private/[a-z\\-]{1,20}",
            id in 1i64..1_000_000,
            value in "[A-Za-z0-9_]{0,16}",
            nonce in 1_500_000_000_000i64..1_900_000_000_000,
            secret in "[A-Za-z0-9]{8,32}",
        ) {
            let p = params(json!({"instrument_name": value}));
            let creds = Credentials::new("api-key", secret.clone());
            let first = creds.sign(&method, id, Some(&p), nonce);
            prop_assert_eq!(&first, &creds.sign(&method, id, Some(&p), nonce));
            prop_assert_eq!(first.len(), 64);

            prop_assert_ne!(&first, &creds.sign(&method, id + 1, Some(&p), nonce));
            prop_assert_ne!(&first, &creds.sign(&method, id, Some(&p), nonce + 1));
            prop_assert_ne!(&first, &creds.sign(&format!("{}x", method), id, Some(&p), nonce));

            let other = params(json!({"instrument_name": format!("{}Z", value)}));
            prop_assert_ne!(&first, &creds.sign(&method, id, Some(&other), nonce));

            let other_secret = Credentials::new("api-key", format!("{}0", secret));
            prop_assert_ne!(&first, &other_secret.sign(&method, id, Some(&p), nonce));

            let other_key = Credentials::new("api-key2", secret);
            prop_assert_ne!(&first, &other_key.sign(&method, id, Some(&p), nonce));
        }
    }
}
