use std::{
    any::{Any, TypeId},
    collections::HashMap,
    fmt,
    sync::Arc,
};

use serde_json::Value;

type EncodeFn = Arc<dyn Fn(&dyn Any) -> Result<Value, tower::BoxError> + Send + Sync>;
type DecodeFn = Arc<dyn Fn(Value) -> Result<Box<dyn Any + Send>, tower::BoxError> + Send + Sync>;

/// A bundle of type-specific encoders and decoders.
///
/// Modules let a payload type use a wire representation other than its serde
/// one without the codec knowing about the type. A module registers one
/// encode/decode pair per type it handles.
pub trait Module {
    /// Human readable module name, used in diagnostics.
    fn name(&self) -> &'static str;

    /// Register this module's types.
    fn setup(&self, registry: &mut ModuleRegistry);
}

#[derive(Clone)]
struct TypeCodec {
    type_name: &'static str,
    encode: EncodeFn,
    decode: DecodeFn,
}

/// Registry of per-type encode/decode pairs, keyed by [`TypeId`].
#[derive(Clone, Default)]
pub struct ModuleRegistry {
    types: HashMap<TypeId, TypeCodec>,
    modules: Vec<&'static str>,
}

impl ModuleRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Install every type of `module`.
    pub fn install<M: Module>(&mut self, module: M) -> &mut Self {
        module.setup(self);
        self.modules.push(module.name());
        self
    }

    /// Register an encode/decode pair for `V`, replacing any previous one.
    pub fn register<V, E, D>(&mut self, encode: E, decode: D) -> &mut Self
    where
        V: Any + Send,
        E: Fn(&V) -> Result<Value, tower::BoxError> + Send + Sync + 'static,
        D: Fn(Value) -> Result<V, tower::BoxError> + Send + Sync + 'static,
    {
        let type_name = std::any::type_name::<V>();
        let codec = TypeCodec {
            type_name,
            encode: Arc::new(move |value: &dyn Any| {
                let value = value
                    .downcast_ref::<V>()
                    .ok_or_else(|| format!("value is not a {type_name}"))?;
                encode(value)
            }),
            decode: Arc::new(move |value| {
                decode(value).map(|decoded| Box::new(decoded) as Box<dyn Any + Send>)
            }),
        };
        self.types.insert(TypeId::of::<V>(), codec);
        self
    }

    /// Move every registration of `other` into `self`, overriding clashes.
    pub(crate) fn merge(&mut self, other: ModuleRegistry) {
        self.types.extend(other.types);
        self.modules.extend(other.modules);
    }

    pub fn contains<V: Any>(&self) -> bool {
        self.types.contains_key(&TypeId::of::<V>())
    }

    /// Names of the installed modules, in installation order.
    pub fn modules(&self) -> &[&'static str] {
        &self.modules
    }

    /// Encode `value` with its registered encoder, if there is one.
    pub(crate) fn encode<V: Any>(&self, value: &V) -> Option<Result<Value, tower::BoxError>> {
        let codec = self.types.get(&TypeId::of::<V>())?;
        Some((codec.encode)(value))
    }

    /// Decode `value` with the decoder registered for `V`, if there is one.
    pub(crate) fn decode<V: Any>(&self, value: Value) -> Option<Result<V, tower::BoxError>> {
        let codec = self.types.get(&TypeId::of::<V>())?;
        let decoded = (codec.decode)(value).and_then(|decoded| {
            decoded
                .downcast::<V>()
                .map(|decoded| *decoded)
                .map_err(|_| format!("decoder for {} returned another type", codec.type_name).into())
        });
        Some(decoded)
    }
}

impl fmt::Debug for ModuleRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut types: Vec<_> = self.types.values().map(|codec| codec.type_name).collect();
        types.sort_unstable();
        f.debug_struct("ModuleRegistry")
            .field("modules", &self.modules)
            .field("types", &types)
            .finish()
    }
}
