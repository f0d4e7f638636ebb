use crate::ports::KeyEncoder;
use std::fmt::Display;

/// Encodes keys with their `Display` form
#[derive(Clone, Copy, Debug, Default)]
pub struct DisplayKeyEncoder;

impl<K: Display + ?Sized> KeyEncoder<K> for DisplayKeyEncoder {
    fn encode(&self, key: &K) -> String {
        key.to_string()
    }
}

/// Namespaces another encoder's output as `<prefix>:<key>`
#[derive(Clone, Debug)]
pub struct PrefixedKeyEncoder<E> {
    prefix: String,
    inner: E,
}

impl<E> PrefixedKeyEncoder<E> {
    pub fn new(prefix: impl Into<String>, inner: E) -> Self {
        Self {
            prefix: prefix.into(),
            inner,
        }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }
}

impl<K: ?Sized, E: KeyEncoder<K>> KeyEncoder<K> for PrefixedKeyEncoder<E> {
    fn encode(&self, key: &K) -> String {
        format!("{}:{}", self.prefix, self.inner.encode(key))
    }
}

/// Encodes keys with an arbitrary function
pub struct FnKeyEncoder<F>(F);

impl<F> FnKeyEncoder<F> {
    pub fn new(f: F) -> Self {
        Self(f)
    }
}

impl<K, F> KeyEncoder<K> for FnKeyEncoder<F>
where
    K: ?Sized,
    F: Fn(&K) -> String + Send + Sync + 'static,
{
    fn encode(&self, key: &K) -> String {
        (self.0)(key)
    }
}
