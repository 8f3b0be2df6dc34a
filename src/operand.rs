use crate::Deferred;

/// Either a plain value or a deferred one, as accepted by the combinators and
/// shortcuts.
///
/// `V` is the type of the plain arm. It is `T` everywhere except
/// [`Deferred::rejected`], which takes a plain reason (`E`) or a deferred
/// value.
pub enum Operand<T, E, V = T> {
    Plain(V),
    Deferred(Deferred<T, E>),
}

impl<T, E, V> Operand<T, E, V> {
    pub fn plain(value: V) -> Self {
        Operand::Plain(value)
    }

    pub fn is_deferred(&self) -> bool {
        matches!(self, Operand::Deferred(_))
    }
}

impl<T, E, V> From<Deferred<T, E>> for Operand<T, E, V> {
    fn from(deferred: Deferred<T, E>) -> Self {
        Operand::Deferred(deferred)
    }
}

impl<T, E, V> Clone for Operand<T, E, V>
where
    V: Clone,
{
    fn clone(&self) -> Self {
        match self {
            Operand::Plain(value) => Operand::Plain(value.clone()),
            Operand::Deferred(deferred) => Operand::Deferred(deferred.clone()),
        }
    }
}

impl<T, E, V> std::fmt::Debug for Operand<T, E, V>
where
    V: std::fmt::Debug,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Operand::Plain(value) => f.debug_tuple("Plain").field(value).finish(),
            Operand::Deferred(deferred) => f.debug_tuple("Deferred").field(deferred).finish(),
        }
    }
}
