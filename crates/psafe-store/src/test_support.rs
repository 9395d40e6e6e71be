//! Shared fixtures for unit tests

use std::sync::{Arc, OnceLock};

use psafe_crypto::{Cipher, CipherRegistry, Pbkdf2Params, WorkingStatus};

pub(crate) const ALL_CIPHERS: [&str; 4] = [
    psafe_crypto::AES_CTR,
    psafe_crypto::AES_GCM,
    psafe_crypto::CHACHA20,
    psafe_crypto::CHACHA20_POLY1305,
];

/// Registry with cheap KDF parameters, self-tested once per test binary.
pub(crate) fn registry() -> &'static CipherRegistry {
    static REGISTRY: OnceLock<CipherRegistry> = OnceLock::new();
    REGISTRY.get_or_init(|| {
        let registry = CipherRegistry::with_defaults(Pbkdf2Params::fast());
        registry.check_all_async();
        for cipher in registry.iter() {
            assert_eq!(cipher.wait_working_check(), WorkingStatus::Working);
        }
        registry
    })
}

pub(crate) fn working_cipher(name: &str) -> Arc<Cipher> {
    registry().get(name).unwrap()
}
