pub mod concurrency;
pub mod consts;
pub mod fingerprint;
