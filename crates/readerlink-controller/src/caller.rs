//! Result continuations and the notification envelope.

use std::sync::Arc;

/// Continuation invoked with a final result.
///
/// Long-lived operators invoke their callers once per event, executors
/// invoke their single caller exactly once. `controller` is the name of the
/// reader controller delivering the result.
///
/// Any `Fn(T, &str) -> anyhow::Result<()>` closure is a caller:
///
/// ```
/// use readerlink_controller::Caller;
/// use readerlink_core::Tag;
///
/// let caller = |tag: Tag, controller: &str| -> anyhow::Result<()> {
///     println!("{} saw {:?}", controller, tag.epc_hex());
///     Ok(())
/// };
///
/// caller.invoke(Tag::new(vec![0x01, 0x02]), "Reader1").unwrap();
/// ```
pub trait Caller<T>: Send + Sync {
    /// Consume one result.
    ///
    /// # Errors
    ///
    /// A failing caller is logged by the controller and does not affect any
    /// other caller.
    fn invoke(&self, result: T, controller: &str) -> anyhow::Result<()>;
}

impl<T, F> Caller<T> for F
where
    F: Fn(T, &str) -> anyhow::Result<()> + Send + Sync,
{
    fn invoke(&self, result: T, controller: &str) -> anyhow::Result<()> {
        self(result, controller)
    }
}

/// Shared caller handle as stored by operators and executors.
pub type SharedCaller<T> = Arc<dyn Caller<T>>;

/// A result queued for the receiver registered under `id`.
#[derive(Debug, Clone, PartialEq)]
pub struct Notify<T> {
    pub id: u32,
    pub data: T,
}

impl<T> Notify<T> {
    pub fn new(id: u32, data: T) -> Self {
        Self { id, data }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[test]
    fn test_closure_is_caller() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let caller: SharedCaller<u32> = Arc::new(move |value: u32, controller: &str| -> anyhow::Result<()> {
            sink.lock().unwrap().push((value, controller.to_string()));
            Ok(())
        });

        caller.invoke(7, "Reader1").unwrap();
        assert_eq!(*seen.lock().unwrap(), vec![(7, "Reader1".to_string())]);
    }

    #[test]
    fn test_failing_caller() {
        let caller = |_: u32, _: &str| -> anyhow::Result<()> { anyhow::bail!("subscriber gone") };
        let error = caller.invoke(1, "Reader1").unwrap_err();
        assert_eq!(error.to_string(), "subscriber gone");
    }
}
