//! Fuzz target for token deserialization.
//!
//! Feeds arbitrary strings to both data protection providers. Decoding must
//! fail cleanly, never panic, on anything that was not issued by the same key.

#![no_main]

use libfuzzer_sys::fuzz_target;
use std::sync::{Arc, OnceLock};

use armature_antiforgery::{
    AesGcmDataProtector, DefaultTokenSerializer, HmacDataProtector, TokenSerializer,
};

const KEY: [u8; 32] = [7u8; 32];

fn serializers() -> &'static [DefaultTokenSerializer; 2] {
    static SERIALIZERS: OnceLock<[DefaultTokenSerializer; 2]> = OnceLock::new();
    SERIALIZERS.get_or_init(|| {
        [
            DefaultTokenSerializer::new(Arc::new(AesGcmDataProtector::new(1, &KEY).unwrap())),
            DefaultTokenSerializer::new(Arc::new(HmacDataProtector::new(KEY.to_vec()).unwrap())),
        ]
    })
}

fuzz_target!(|data: &str| {
    for serializer in serializers() {
        if let Ok(token) = serializer.deserialize(data) {
            // Anything that decodes must re-encode and decode to the same token.
            let again = serializer.serialize(&token).unwrap();
            assert_eq!(serializer.deserialize(&again).unwrap(), token);
        }
    }
});
