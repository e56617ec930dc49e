//! Unit tests for response helpers

use gen_failover_gateway::response::{base64, ImageLocator, UrlHandler};
use gen_failover_gateway::storage::ContentKey;

#[test]
fn test_base64_encode_decode() {
    let original = b"Hello, World!";
    let encoded = base64::encode(original);
    let decoded = base64::decode(&encoded).unwrap();

    assert_eq!(original.as_slice(), decoded.as_slice());
}

#[test]
fn test_base64_decode_data_url() {
    let data_url = "data:image/png;base64,SGVsbG8sIFdvcmxkIQ==";
    let decoded = base64::decode(data_url).unwrap();

    assert_eq!(b"Hello, World!", decoded.as_slice());
}

#[test]
fn test_base64_rejects_garbage() {
    assert!(base64::decode("not valid base64!!!").is_err());
}

#[test]
fn test_stored_locator_url() {
    let urls = UrlHandler::new("https://image-labs.example.com/images");
    let key = ContentKey::hash(b"image bytes");
    let locator = ImageLocator::Stored(key.clone());

    assert_eq!(
        urls.generate_url(&locator),
        format!("https://image-labs.example.com/images/{}", key)
    );
    assert_eq!(locator.key(), Some(&key));
    assert!(!locator.is_placeholder());
}

#[test]
fn test_placeholder_locator_url() {
    let urls = UrlHandler::new("https://image-labs.example.com/images");
    let locator = ImageLocator::Placeholder("https://i.imgur.com/tdGdu9l.png".to_string());

    assert_eq!(urls.generate_url(&locator), "https://i.imgur.com/tdGdu9l.png");
    assert_eq!(locator.key(), None);
}

#[test]
fn test_locator_serializes_with_kind() {
    let locator = ImageLocator::Placeholder("https://cdn.example.com/p.png".to_string());
    let json = serde_json::to_value(&locator).unwrap();
    assert_eq!(json["kind"], "placeholder");
    assert_eq!(json["value"], "https://cdn.example.com/p.png");
}
