//! Channel authorization proofs.
//!
//! Before a client may join a private or presence channel, the application's
//! own backend signs the tuple `socket_id:channel_name[:channel_data]` with the
//! application secret.  The client passes the result in the `auth` field of
//! `pusher:subscribe` as `"<app key>:<hex signature>"`.
//!
//! ```text
//! string_to_sign = "1234.5678:private-orders"
//! string_to_sign = "1234.5678:presence-room1:{\"user_id\":\"u1\"}"
//! auth           = key + ":" + hex(HMAC-SHA256(secret, string_to_sign))
//! ```

use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Builds the string the application backend signs.
pub fn string_to_sign(socket_id: &str, channel: &str, channel_data: Option<&str>) -> String {
    match channel_data {
        Some(data) => format!("{socket_id}:{channel}:{data}"),
        None => format!("{socket_id}:{channel}"),
    }
}

/// Computes the full `auth` value (`key:hexsignature`) for a subscription.
///
/// The relay itself only verifies; this is used by tests and by tooling that
/// plays the role of the application backend.
pub fn sign_channel(
    key: &str,
    secret: &str,
    socket_id: &str,
    channel: &str,
    channel_data: Option<&str>,
) -> String {
    // HMAC accepts keys of any length, so `new_from_slice` cannot fail here.
    let mut mac = match HmacSha256::new_from_slice(secret.as_bytes()) {
        Ok(mac) => mac,
        Err(_) => return String::new(),
    };
    mac.update(string_to_sign(socket_id, channel, channel_data).as_bytes());
    format!("{key}:{}", hex::encode(mac.finalize().into_bytes()))
}

/// Checks a client-supplied `auth` value.
///
/// The key part must equal the application key and the signature must match
/// the HMAC of the exact tuple.  The comparison runs in constant time.
pub fn verify_channel_auth(
    key: &str,
    secret: &str,
    socket_id: &str,
    channel: &str,
    channel_data: Option<&str>,
    auth: &str,
) -> bool {
    let Some((given_key, given_sig)) = auth.split_once(':') else {
        return false;
    };
    if given_key != key {
        return false;
    }
    let Ok(sig_bytes) = hex::decode(given_sig) else {
        return false;
    };

    let Ok(mut mac) = HmacSha256::new_from_slice(secret.as_bytes()) else {
        return false;
    };
    mac.update(string_to_sign(socket_id, channel, channel_data).as_bytes());
    mac.verify_slice(&sig_bytes).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    const KEY: &str = "278d425bdf160c739803";
    const SECRET: &str = "7ad3773142a6692b25b8";

    #[test]
    fn test_sign_matches_pusher_documentation_vector() {
        // Example from the Pusher channel authorization docs.
        let auth = sign_channel(KEY, SECRET, "1234.1234", "private-foobar", None);
        assert_eq!(
            auth,
            "278d425bdf160c739803:58df8b0c36d6982b82c3ecf6b4662e34fe8c25bba48f5369f135bf843651c3a4"
        );
    }

    #[test]
    fn test_verify_accepts_own_signature() {
        let auth = sign_channel(KEY, SECRET, "1.2", "private-orders", None);
        assert!(verify_channel_auth(KEY, SECRET, "1.2", "private-orders", None, &auth));
    }

    #[test]
    fn test_verify_binds_presence_channel_data() {
        let data = r#"{"user_id":"u1"}"#;
        let auth = sign_channel(KEY, SECRET, "1.2", "presence-room", Some(data));
        assert!(verify_channel_auth(KEY, SECRET, "1.2", "presence-room", Some(data), &auth));
        // Tampered member data must not verify.
        let forged = r#"{"user_id":"admin"}"#;
        assert!(!verify_channel_auth(KEY, SECRET, "1.2", "presence-room", Some(forged), &auth));
    }

    #[test]
    fn test_verify_rejects_other_socket_or_channel() {
        let auth = sign_channel(KEY, SECRET, "1.2", "private-orders", None);
        assert!(!verify_channel_auth(KEY, SECRET, "9.9", "private-orders", None, &auth));
        assert!(!verify_channel_auth(KEY, SECRET, "1.2", "private-other", None, &auth));
    }

    #[test]
    fn test_verify_rejects_wrong_key_prefix_and_garbage() {
        let auth = sign_channel("other-key", SECRET, "1.2", "private-a", None);
        assert!(!verify_channel_auth(KEY, SECRET, "1.2", "private-a", None, &auth));
        assert!(!verify_channel_auth(KEY, SECRET, "1.2", "private-a", None, "no-colon"));
        assert!(!verify_channel_auth(KEY, SECRET, "1.2", "private-a", None, "key:zz"));
        assert!(!verify_channel_auth(KEY, SECRET, "1.2", "private-a", None, ""));
    }

    #[test]
    fn test_verify_signature_hex_is_case_insensitive_and_strict() {
        let auth = sign_channel(KEY, SECRET, "1.2", "private-a", None);
        let (_, sig) = auth.split_once(':').unwrap();
        let upper = format!("{KEY}:{}", sig.to_uppercase());
        assert!(verify_channel_auth(KEY, SECRET, "1.2", "private-a", None, &upper));

        let odd = format!("{KEY}:{}", &sig[1..]);
        let bad_digit = format!("{KEY}:zz{}", &sig[2..]);
        assert!(!verify_channel_auth(KEY, SECRET, "1.2", "private-a", None, &odd));
        assert!(!verify_channel_auth(KEY, SECRET, "1.2", "private-a", None, &bad_digit));
    }
}
