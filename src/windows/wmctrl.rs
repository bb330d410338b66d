//! [`WindowManager`] backed by the `wmctrl` tool (EWMH-compliant X11 window managers).

use async_trait::async_trait;
use tokio::process::Command;

use super::{WindowId, WindowManager};

/// Shells out to `wmctrl -lp` (listing) and `wmctrl -i -a` (activation).
///
/// A missing `wmctrl` binary or a failing invocation behaves like a window
/// manager that reports no windows.
#[derive(Debug, Clone)]
pub struct WmctrlWindowManager {
    program: String,
}

impl Default for WmctrlWindowManager {
    fn default() -> Self {
        Self {
            program: "wmctrl".into(),
        }
    }
}

impl WmctrlWindowManager {
    pub fn new() -> Self {
        Self::default()
    }

    async fn run(&self, args: &[&str]) -> Option<String> {
        match Command::new(&self.program).args(args).output().await {
            Ok(out) if out.status.success() => {
                Some(String::from_utf8_lossy(&out.stdout).into_owned())
            }
            Ok(out) => {
                tracing::debug!(status = %out.status, ?args, "wmctrl failed");
                None
            }
            Err(e) => {
                tracing::debug!(error = %e, "wmctrl unavailable");
                None
            }
        }
    }
}

/// Parses `wmctrl -lp` output: `<0xID> <desktop> <pid> <host> <title...>`.
fn parse_list(output: &str, pid: u32) -> Vec<WindowId> {
    output
        .lines()
        .filter_map(|line| {
            let mut cols = line.split_whitespace();
            let id = cols.next()?;
            let _desktop = cols.next()?;
            let owner: u32 = cols.next()?.parse().ok()?;
            if owner != pid {
                return None;
            }
            WindowId::from_str_radix(id.trim_start_matches("0x"), 16).ok()
        })
        .collect()
}

#[async_trait]
impl WindowManager for WmctrlWindowManager {
    async fn activate_windows(&self, pid: u32) -> bool {
        let mut activated = false;
        for id in self.list_window_ids(pid).await {
            let hex = format!("{id:#010x}");
            activated |= self.run(&["-i", "-a", &hex]).await.is_some();
        }
        activated
    }

    async fn list_window_ids(&self, pid: u32) -> Vec<WindowId> {
        match self.run(&["-lp"]).await {
            Some(out) => parse_list(&out, pid),
            None => Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const LISTING: &str = "\
0x01e00003  0 1234   host Mozilla Firefox
0x01e0000f  0 1234   host Downloads
0x02400007 -1 999    host Panel
garbage line
0x0260000a  1 1234   host
";

    #[test]
    fn test_parse_filters_by_owner_in_order() {
        assert_eq!(
            parse_list(LISTING, 1234),
            vec![0x01e00003, 0x01e0000f, 0x0260000a]
        );
        assert_eq!(parse_list(LISTING, 999), vec![0x02400007]);
        assert!(parse_list(LISTING, 1).is_empty());
    }

    #[tokio::test]
    async fn test_missing_binary_reports_nothing() {
        let wm = WmctrlWindowManager {
            program: "/nonexistent/wmctrl".into(),
        };
        assert!(wm.list_window_ids(1).await.is_empty());
        assert!(!wm.activate_windows(1).await);
    }
}
