use std::{path::Path, time::Duration};

use super::{LaunchCommand, ProcessFactory, ProcessTree, ServiceKind, ServiceLaunch, ServiceProcessHandle};
use crate::error::StackError;

/// Stand-in for hosts without process support; every capability fails with
/// [`StackError::UnsupportedPlatform`].
#[derive(Debug, Default, Clone, Copy)]
pub struct UnsupportedFactory;

fn unsupported<T>(operation: &'static str) -> Result<T, StackError> {
    Err(StackError::UnsupportedPlatform { operation })
}

impl ProcessFactory for UnsupportedFactory {
    fn name(&self) -> &'static str {
        "unsupported"
    }

    fn version_check_command(&self, _java: &Path) -> Result<LaunchCommand, StackError> {
        unsupported("version_check_command")
    }

    fn service_command(&self, _kind: ServiceKind, _launch: &ServiceLaunch) -> Result<LaunchCommand, StackError> {
        unsupported("service_command")
    }

    fn launch(&self, _kind: ServiceKind, _command: LaunchCommand) -> Result<ServiceProcessHandle, StackError> {
        unsupported("launch")
    }

    fn open_default_browser(&self, _url: &str) -> Result<(), StackError> {
        unsupported("open_default_browser")
    }

    fn enumerate_process_tree(&self, _handle: &ServiceProcessHandle) -> Result<ProcessTree, StackError> {
        unsupported("enumerate_process_tree")
    }

    fn terminate_tree(
        &self,
        _handle: &mut ServiceProcessHandle,
        _tree: &ProcessTree,
        _grace: Duration,
    ) -> Result<(), StackError> {
        unsupported("terminate_tree")
    }
}
