use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use mlua::{HookTriggers, Lua, VmState};
use switchyard_sandbox::TIMEOUT_MESSAGE;

/// Instructions between deadline checks.
const CHECK_INTERVAL: u32 = 1000;

/// Cumulative script execution budget enforced through a Lua instruction hook.
pub(crate) struct Budget {
  limit: Duration,
  spent: Duration,
  deadline: Arc<Mutex<Option<Instant>>>,
}

impl Budget {
  pub(crate) fn new(limit: Duration) -> Self {
    Self {
      limit,
      spent: Duration::ZERO,
      deadline: Arc::new(Mutex::new(None)),
    }
  }

  /// Install the deadline hook on `lua`. Outside of [`Budget::start`] /
  /// [`Budget::finish`] the hook never fires.
  pub(crate) fn install(&self, lua: &Lua) {
    let deadline = Arc::clone(&self.deadline);
    lua.set_hook(
      HookTriggers::new().every_nth_instruction(CHECK_INTERVAL),
      move |_lua, _debug| {
        let expired = match deadline.lock() {
          Ok(guard) => matches!(*guard, Some(at) if Instant::now() >= at),
          Err(_) => false,
        };
        if expired {
          return Err(mlua::Error::RuntimeError(TIMEOUT_MESSAGE.to_string()));
        }
        Ok(VmState::Continue)
      },
    );
  }

  pub(crate) fn set_limit(&mut self, limit: Duration) {
    self.limit = limit;
  }

  pub(crate) fn remaining(&self) -> Duration {
    self.limit.saturating_sub(self.spent)
  }

  /// Arm the deadline for one script run.
  pub(crate) fn start(&self) -> Instant {
    let started = Instant::now();
    if let Ok(mut guard) = self.deadline.lock() {
      *guard = Some(started + self.remaining());
    }
    started
  }

  /// Disarm the deadline and charge the run's time.
  pub(crate) fn finish(&mut self, started: Instant) {
    if let Ok(mut guard) = self.deadline.lock() {
      *guard = None;
    }
    self.spent += started.elapsed();
  }
}
