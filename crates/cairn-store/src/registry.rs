//! Decoders from stored JSON back to an application's event enum.

use std::collections::HashMap;

use serde::de::DeserializeOwned;

type Decoder<E> = Box<dyn Fn(&str) -> Result<E, serde_json::Error>>;

/// Maps chain `event_type` names to decoders.
///
/// Reads skip rows whose type is not registered, so a reader only needs to
/// know the types it cares about.
///
/// ```rust
/// use cairn_store::TypeRegistry;
/// use serde::Deserialize;
///
/// #[derive(Debug, Deserialize)]
/// struct Msg {
///     text: String,
/// }
///
/// #[derive(Debug)]
/// enum AppEvent {
///     Msg(Msg),
/// }
///
/// impl From<Msg> for AppEvent {
///     fn from(m: Msg) -> Self {
///         Self::Msg(m)
///     }
/// }
///
/// let registry = TypeRegistry::<AppEvent>::new().with::<Msg>("Msg");
/// assert!(registry.contains("Msg"));
/// ```
pub struct TypeRegistry<E> {
    decoders: HashMap<String, Decoder<E>>,
}

impl<E> Default for TypeRegistry<E> {
    fn default() -> Self {
        Self {
            decoders: HashMap::new(),
        }
    }
}

impl<E: 'static> TypeRegistry<E> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `T` as the payload type for `event_type`, replacing any
    /// earlier decoder for that name.
    pub fn register<T>(&mut self, event_type: &str) -> &mut Self
    where
        T: DeserializeOwned + Into<E> + 'static,
    {
        self.register_fn(event_type, |json| serde_json::from_str::<T>(json).map(Into::into))
    }

    /// Registers a custom decoder for `event_type`.
    pub fn register_fn<F>(&mut self, event_type: &str, decode: F) -> &mut Self
    where
        F: Fn(&str) -> Result<E, serde_json::Error> + 'static,
    {
        self.decoders.insert(event_type.to_string(), Box::new(decode));
        self
    }

    /// Builder form of [`TypeRegistry::register`].
    pub fn with<T>(mut self, event_type: &str) -> Self
    where
        T: DeserializeOwned + Into<E> + 'static,
    {
        self.register::<T>(event_type);
        self
    }

    pub fn contains(&self, event_type: &str) -> bool {
        self.decoders.contains_key(event_type)
    }

    /// Decodes `json` as `event_type`. Returns `None` for unregistered types.
    pub fn decode(&self, event_type: &str, json: &str) -> Option<Result<E, serde_json::Error>> {
        self.decoders.get(event_type).map(|decode| decode(json))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, PartialEq, Deserialize)]
    struct Ping {
        n: u32,
    }

    #[derive(Debug, PartialEq)]
    enum Ev {
        Ping(Ping),
        Raw(String),
    }

    impl From<Ping> for Ev {
        fn from(p: Ping) -> Self {
            Self::Ping(p)
        }
    }

    #[test]
    fn decodes_registered_types() {
        let registry = TypeRegistry::<Ev>::new().with::<Ping>("Ping");
        let ev = registry
            .decode("Ping", r#"{"n":3}"#)
            .expect("registered")
            .expect("valid json");
        assert_eq!(ev, Ev::Ping(Ping { n: 3 }));
    }

    #[test]
    fn unregistered_types_decode_to_none() {
        let registry = TypeRegistry::<Ev>::new().with::<Ping>("Ping");
        assert!(registry.decode("Pong", "{}").is_none());
        assert!(!registry.contains("Pong"));
    }

    #[test]
    fn malformed_payloads_are_errors() {
        let registry = TypeRegistry::<Ev>::new().with::<Ping>("Ping");
        let result = registry.decode("Ping", r#"{"n":"three"}"#).expect("registered");
        assert!(result.is_err());
    }

    #[test]
    fn custom_decoders_are_supported() {
        let mut registry = TypeRegistry::<Ev>::new();
        registry.register_fn("Raw", |json| Ok(Ev::Raw(json.to_string())));
        let ev = registry
            .decode("Raw", r#"{"x":1}"#)
            .expect("registered")
            .expect("decoder never fails");
        assert_eq!(ev, Ev::Raw(r#"{"x":1}"#.to_string()));
    }
}
