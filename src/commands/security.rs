//! Vial security lock handlers.

use std::fmt::Write;
use std::time::{Duration, Instant};

use anyhow::bail;
use tracing::debug;
use vial_keyboard::LoadOptions;

use super::{with_keyboard, Context};

const POLL_INTERVAL: Duration = Duration::from_millis(100);

fn require_vial(vial_protocol: Option<u32>) -> anyhow::Result<()> {
    if vial_protocol.is_none() {
        bail!("security lock needs Vial firmware; this keyboard only speaks VIA");
    }
    Ok(())
}

pub fn status(ctx: &mut Context) -> anyhow::Result<()> {
    with_keyboard(ctx, LoadOptions::none(), |ctx, kb, info| {
        require_vial(info.vial_protocol)?;
        let status = kb.get_unlock_status()?;
        ctx.out.emit(&status, |out| {
            let state = if status.unlocked { "unlocked" } else { "locked" };
            writeln!(out, "Keyboard is {state}")?;
            if status.in_progress {
                writeln!(out, "Unlock in progress")?;
            }
            if !status.unlocked && !status.keys.is_empty() {
                let keys: Vec<String> = status
                    .keys
                    .iter()
                    .map(|(row, col)| format!("[{row},{col}]"))
                    .collect();
                writeln!(out, "Unlock keys (row,col): {}", keys.join(" "))?;
            }
            Ok(())
        })
    })
}

/// Start an unlock and wait while the user holds the unlock keys
pub fn unlock(ctx: &mut Context, timeout_secs: u64) -> anyhow::Result<()> {
    with_keyboard(ctx, LoadOptions::none(), |ctx, kb, info| {
        require_vial(info.vial_protocol)?;
        let status = kb.get_unlock_status()?;
        if status.unlocked {
            return ctx.out.message("Keyboard is already unlocked");
        }

        let keys: Vec<String> = status
            .keys
            .iter()
            .map(|(row, col)| format!("[{row},{col}]"))
            .collect();
        eprintln!("Hold the unlock keys (row,col): {}", keys.join(" "));

        kb.unlock_start()?;
        let deadline = Instant::now() + Duration::from_secs(timeout_secs);
        let mut last_remaining = None;
        loop {
            let poll = kb.unlock_poll()?;
            if poll.unlocked {
                return ctx.out.message("Keyboard unlocked");
            }
            if last_remaining != Some(poll.remaining) {
                debug!("Unlock counter: {}", poll.remaining);
                if poll.in_progress {
                    eprintln!("  keep holding... ({} left)", poll.remaining);
                }
                last_remaining = Some(poll.remaining);
            }
            if Instant::now() >= deadline {
                bail!("unlock timed out after {timeout_secs}s");
            }
            std::thread::sleep(POLL_INTERVAL);
        }
    })
}

pub fn lock(ctx: &mut Context) -> anyhow::Result<()> {
    with_keyboard(ctx, LoadOptions::none(), |ctx, kb, info| {
        require_vial(info.vial_protocol)?;
        kb.lock()?;
        ctx.out.message("Keyboard locked")
    })
}
