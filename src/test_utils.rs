use std::{
    thread,
    time::{Duration, Instant},
};

use nix::{errno::Errno, sys::signal, unistd::Pid};

/// Polls `condition` until it holds or `timeout` elapses.
pub fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    loop {
        if condition() {
            return true;
        }
        if Instant::now() >= deadline {
            return false;
        }
        thread::sleep(Duration::from_millis(25));
    }
}

/// True once `pid` is gone from the process table or only lingers as a zombie.
pub fn process_gone(pid: u32) -> bool {
    if matches!(
        signal::kill(Pid::from_raw(pid as i32), None),
        Err(Errno::ESRCH)
    ) {
        return true;
    }

    #[cfg(target_os = "linux")]
    {
        // The third field in /proc/{pid}/stat is the state character.
        if let Ok(stat) = std::fs::read_to_string(format!("/proc/{pid}/stat"))
            && let Some(end) = stat.rfind(')')
            && let Some(state) = stat[end + 1..].trim().chars().next()
        {
            return state == 'Z' || state == 'X';
        }
    }

    false
}
