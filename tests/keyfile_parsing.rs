//! Black-box coverage of key file format discrimination (C6) and its
//! effect on the composite credential, observed indirectly through a
//! generic container round trip since `CompositeCredential`'s hash is
//! not itself public.

use kdbx3_cache::{decrypt_kdbx, encrypt_kdbx, keyfile, CompositeCredential, Error};

#[test]
fn recognizes_a_32_byte_binary_key_file() {
    let bytes: Vec<u8> = (0u8..32).collect();
    let secret = keyfile::parse(&bytes).unwrap();
    assert_eq!(secret, bytes.as_slice());
}

#[test]
fn recognizes_a_64_character_hex_key_file() {
    let hex_text = format!("{}{}", "00".repeat(16), "FF".repeat(16));
    let secret = keyfile::parse(hex_text.as_bytes()).unwrap();
    let mut expected = [0u8; 32];
    expected[16..].fill(0xFF);
    assert_eq!(secret, expected);
}

#[test]
fn recognizes_an_xml_key_file() {
    use base64::{engine::general_purpose::STANDARD, Engine as _};
    let raw = [9u8; 32];
    let encoded = STANDARD.encode(raw);
    let xml = format!("<KeyFile><Key><Data>{encoded}</Data></Key></KeyFile>");
    let secret = keyfile::parse(xml.as_bytes()).unwrap();
    assert_eq!(secret, raw);
}

#[test]
fn garbage_key_file_is_rejected() {
    assert!(matches!(
        keyfile::parse(b"definitely not a key file"),
        Err(Error::KeyFileInvalid)
    ));
}

#[test]
fn key_file_changes_the_effective_credential() {
    let key_file_a: Vec<u8> = (0u8..32).collect();
    let key_file_b: Vec<u8> = (32u8..64).collect();

    let credential_a = CompositeCredential::from_password_and_key_file("shared-password", &key_file_a);
    let encrypted = encrypt_kdbx(b"payload", &credential_a, 8).unwrap();

    // Same password, same key file: unlocks.
    let same = CompositeCredential::from_password_and_key_file("shared-password", &key_file_a);
    assert!(decrypt_kdbx(&encrypted, &same).is_ok());

    // Same password, different key file: does not.
    let different_key_file =
        CompositeCredential::from_password_and_key_file("shared-password", &key_file_b);
    assert!(matches!(
        decrypt_kdbx(&encrypted, &different_key_file),
        Err(Error::BadCredential)
    ));

    // Password alone, no key file: does not.
    let password_only = CompositeCredential::from_password("shared-password");
    assert!(matches!(
        decrypt_kdbx(&encrypted, &password_only),
        Err(Error::BadCredential)
    ));
}

#[test]
fn an_unrecognized_key_file_does_not_contribute_to_the_credential() {
    // A key file that doesn't parse must be silently dropped rather than
    // contributing a member - so the composite credential degrades to
    // the password alone.
    let garbage_key_file = b"not a valid key file at all";
    let with_garbage =
        CompositeCredential::from_password_and_key_file("shared-password", garbage_key_file);
    let encrypted = encrypt_kdbx(b"payload", &with_garbage, 8).unwrap();

    let password_only = CompositeCredential::from_password("shared-password");
    assert!(decrypt_kdbx(&encrypted, &password_only).is_ok());
}
