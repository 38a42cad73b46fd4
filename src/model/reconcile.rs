//! Per-field merge of live provider data into a local record.

/// Outcome of reconciling one field.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Reconciled<T> {
    /// Value to store.
    pub value: T,
    /// `true` when the live value was absent and the old value was kept.
    pub defaulted: bool,
}

/// Prefers the live value; falls back to the old one when the provider
/// omitted the field.
#[must_use]
pub fn reconcile<T>(old: T, live: Option<T>) -> Reconciled<T> {
    match live {
        Some(value) => Reconciled {
            value,
            defaulted: false,
        },
        None => Reconciled {
            value: old,
            defaulted: true,
        },
    }
}
