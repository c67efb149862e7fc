/// Translates variable names to stable store indices at compile time.
///
/// The compiler resolves every variable reference once, so the VM only ever
/// performs index lookups.
pub trait NameResolver {
    fn resolve_index(&self, name: &str) -> Option<usize>;

    /// Reverse lookup, used when printing bytecode.
    fn name_of(&self, _index: usize) -> Option<&str> {
        None
    }
}

/// Resolver that knows no variables; for constant expressions.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoVariables;

impl NameResolver for NoVariables {
    fn resolve_index(&self, _name: &str) -> Option<usize> {
        None
    }
}

/// A plain list of names resolves each name to its position.
impl<S: AsRef<str>> NameResolver for Vec<S> {
    fn resolve_index(&self, name: &str) -> Option<usize> {
        self.iter().position(|n| n.as_ref() == name)
    }

    fn name_of(&self, index: usize) -> Option<&str> {
        self.get(index).map(AsRef::as_ref)
    }
}
