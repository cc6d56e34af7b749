pub mod aead;
pub mod asymmetric;
pub mod encstring;
pub mod kdf;
pub mod keys;
pub mod sensitive;
pub mod symmetric;
pub mod totp;
