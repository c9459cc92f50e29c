//! The script contract.

use tasfw_resource::Resource;

use crate::session::Session;
use crate::EngineError;

/// One unit of search logic, run through a [`Session`] verb.
///
/// An invocation runs [`validation`](Script::validation), then
/// [`execution`](Script::execution), then [`assertion`](Script::assertion),
/// stopping at the first that returns `false`. The invocation is asserted
/// only when execution and assertion both return `true`.
///
/// `validation` and `assertion` only get a shared session, so they cannot
/// advance the simulation or change any diff.
///
/// Returning `Err` is reserved for faults that end the whole session.
pub trait Script<R: Resource> {
    /// Script-specific result, filled in by `execution`.
    type Status: Default;

    /// Name used in logs and in [`BaseStatus::script`](crate::status::BaseStatus::script).
    fn name(&self) -> &'static str {
        let full = std::any::type_name::<Self>();
        let path = full.split('<').next().unwrap_or(full);
        path.rsplit("::").next().unwrap_or(path)
    }

    /// Precondition on the current state.
    fn validation(&self, _session: &Session<R>) -> Result<bool, EngineError> {
        Ok(true)
    }

    /// Advance the simulation and invoke children.
    fn execution(
        &mut self,
        session: &mut Session<R>,
        status: &mut Self::Status,
    ) -> Result<bool, EngineError>;

    /// Postcondition on the state and status execution left behind.
    fn assertion(&self, _session: &Session<R>, _status: &Self::Status) -> Result<bool, EngineError> {
        Ok(true)
    }
}
