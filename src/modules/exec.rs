use crate::modules::types::{VMResult, VM};

/// Step until the VM produces a result. Suspensions come back to the caller
/// as `VMFailure(Query _)` / `VMFailure(Choose _)`; answer and call again.
pub fn exec(vm: &mut VM) -> VMResult {
  loop {
    if let Some(result) = &vm.result {
      return result.clone();
    }
    vm.exec1();
  }
}
