use std::{thread, time};

use serde::{Deserialize, Serialize};

use crate::{
    command::Command,
    error::UPSError,
    mailer::Mailer,
    status::{QueryResult, StatusFlags},
    transport::Transport,
    ups::UPS,
};

// The following define polling behaviour and shutdown behaviour.
const POLL_DELAY: u64 = 10; // Seconds to wait between polls.
const ON_BATTERY_POLL_DELAY: u64 = 1; // Seconds to wait between polls while utility is failed.
const MINUTES_TO_SHUTDOWN: f32 = 2.0; // Time to wait for the host to shutdown before the UPS does.
const MINUTES_TO_RESTORE: u32 = 0; // Time after shutdown before restart. 0 means no restart.

#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
pub struct MonitorSettings {
    pub poll_delay: u64,
    pub on_battery_poll_delay: u64,
    pub shutdown_on_battery_low: bool,
    pub minutes_to_shutdown: f32,
    pub minutes_to_restore: u32,
}

impl Default for MonitorSettings {
    fn default() -> Self {
        MonitorSettings {
            poll_delay: POLL_DELAY,
            on_battery_poll_delay: ON_BATTERY_POLL_DELAY,
            shutdown_on_battery_low: false,
            minutes_to_shutdown: MINUTES_TO_SHUTDOWN,
            minutes_to_restore: MINUTES_TO_RESTORE,
        }
    }
}

impl MonitorSettings {
    /// The command sent when the battery runs low.
    pub fn shutdown_command(&self) -> Command {
        if self.minutes_to_restore > 0 {
            Command::ShutdownRestore {
                delay: self.minutes_to_shutdown,
                restore: self.minutes_to_restore,
            }
        } else {
            Command::Shutdown {
                delay: self.minutes_to_shutdown,
            }
        }
    }
}

/// Describes every flag that differs between two polls.
pub fn status_changes(prev: &StatusFlags, now: &StatusFlags) -> Vec<String> {
    let flags = [
        ("Utility failed", "Utility back", prev.utility_fail, now.utility_fail),
        ("Battery low", "Battery recovered", prev.battery_low, now.battery_low),
        (
            "Bypass or buck active",
            "Bypass or buck inactive",
            prev.bypass_or_buck_active,
            now.bypass_or_buck_active,
        ),
        ("UPS fault", "UPS fault cleared", prev.ups_fail, now.ups_fail),
        ("On standby", "Online", prev.standby, now.standby),
        ("Self test started", "Self test finished", prev.test_in_progress, now.test_in_progress),
        ("Shutdown pending", "Shutdown cancelled", prev.shutdown_active, now.shutdown_active),
        ("Beeper on", "Beeper off", prev.beeper_on, now.beeper_on),
    ];

    flags
        .iter()
        .filter(|(_, _, was, is)| was != is)
        .map(|(set, cleared, _, is)| (if *is { *set } else { *cleared }).to_string())
        .collect()
}

pub struct Monitor<'a, T: Transport> {
    ups: &'a mut UPS<T>,
    settings: MonitorSettings,
    mailer: Option<&'a Mailer>,
    last: Option<StatusFlags>,
    communication_failed: bool,
}

impl<'a, T: Transport> Monitor<'a, T> {
    pub fn new(
        ups: &'a mut UPS<T>,
        settings: MonitorSettings,
        mailer: Option<&'a Mailer>,
    ) -> Result<Monitor<'a, T>, UPSError> {
        // A bad shutdown setting has to surface now, not once the battery is already low.
        if settings.shutdown_on_battery_low {
            settings.shutdown_command().encode()?;
        }

        Ok(Monitor {
            ups,
            settings,
            mailer,
            last: None,
            communication_failed: false,
        })
    }

    fn next_delay(&self) -> u64 {
        match self.last {
            Some(status) if status.utility_fail => self.settings.on_battery_poll_delay,
            _ => self.settings.poll_delay,
        }
    }

    fn notify(&self, subject: &str, body: &str) {
        if let Some(mailer) = self.mailer {
            mailer.notify(subject, body);
        }
    }

    /// Polls until the transport fails.
    pub fn run(&mut self) -> Result<(), UPSError> {
        log::info!("UPS monitor running.");
        loop {
            let delay = self.poll()?;
            thread::sleep(time::Duration::from_secs(delay));
        }
    }

    /// Runs one query and reacts to it, returning the seconds until the next poll.
    pub fn poll(&mut self) -> Result<u64, UPSError> {
        let result = match self.ups.query() {
            Ok(result) => result,
            Err(e) if e.is_recoverable() => {
                log::warn!("UPS communication failed: {}", e);
                if !self.communication_failed {
                    self.notify("UPS communication failed.", &e.to_string());
                    self.communication_failed = true;
                }
                return Ok(self.next_delay());
            }
            Err(e) => {
                self.notify("UPS connection lost.", &e.to_string());
                return Err(e);
            }
        };

        if self.communication_failed {
            log::info!("UPS communication restored.");
            self.communication_failed = false;
        }

        self.react(&result)?;
        self.last = Some(result.status);
        Ok(self.next_delay())
    }

    fn react(&mut self, result: &QueryResult) -> Result<(), UPSError> {
        let prev = match self.last {
            Some(prev) => prev,
            None => {
                log::info!("UPS status: {:?}", result.status);
                if result.status.battery_low {
                    self.battery_low(result)?;
                }
                return Ok(());
            }
        };

        let changes = status_changes(&prev, &result.status);
        if changes.is_empty() {
            return Ok(());
        }
        for change in &changes {
            log::warn!("{}.", change);
        }
        self.notify(&changes.join(", "), &format!("{:#?}", result));

        if result.status.battery_low && !prev.battery_low {
            self.battery_low(result)?;
        }
        Ok(())
    }

    fn battery_low(&mut self, result: &QueryResult) -> Result<(), UPSError> {
        if !self.settings.shutdown_on_battery_low {
            return Ok(());
        }

        let delay = self.settings.minutes_to_shutdown;
        self.ups.execute(self.settings.shutdown_command())?;

        log::warn!(
            "Battery low at {}V - UPS set to shutdown in {}min.",
            result.battery_voltage,
            delay
        );
        self.notify(
            "Battery low - UPS shutting down.",
            &format!("UPS will shutdown in {}min.\n{:#?}", delay, result),
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::mock::MockTransport;

    const ONLINE: &[u8] = b"(230.0 230.0 230.0 010 50.0 27.0 30.0 00000001\r";
    const ON_BATTERY: &[u8] = b"(000.0 000.0 230.0 010 50.0 25.0 30.0 10000001\r";
    const BATTERY_LOW: &[u8] = b"(000.0 000.0 230.0 010 50.0 21.0 30.0 11000001\r";

    #[test]
    fn reports_only_changed_flags() {
        let prev = StatusFlags::decode("00000001").unwrap();
        let now = StatusFlags::decode("10001001").unwrap();
        assert_eq!(
            status_changes(&prev, &now),
            vec!["Utility failed".to_string(), "On standby".to_string()]
        );
        assert_eq!(
            status_changes(&now, &prev),
            vec!["Utility back".to_string(), "Online".to_string()]
        );
        assert!(status_changes(&prev, &prev).is_empty());
    }

    #[test]
    fn polls_faster_on_battery() {
        let mut port = MockTransport::new().deliver(ONLINE).deliver(ON_BATTERY);
        let mut ups = UPS::new(&mut port);
        let mut monitor = Monitor::new(&mut ups, MonitorSettings::default(), None).unwrap();

        assert_eq!(monitor.poll().unwrap(), POLL_DELAY);
        assert_eq!(monitor.poll().unwrap(), ON_BATTERY_POLL_DELAY);
    }

    #[test]
    fn shuts_down_when_battery_goes_low() {
        let mut port = MockTransport::new()
            .deliver(ON_BATTERY)
            .deliver(BATTERY_LOW)
            .deliver(BATTERY_LOW);
        let mut ups = UPS::new(&mut port);
        let settings = MonitorSettings {
            shutdown_on_battery_low: true,
            minutes_to_restore: 5,
            ..MonitorSettings::default()
        };
        let mut monitor = Monitor::new(&mut ups, settings, None).unwrap();

        monitor.poll().unwrap();
        monitor.poll().unwrap();
        // Still low, no second shutdown.
        monitor.poll().unwrap();
        drop(monitor);
        drop(ups);
        assert_eq!(port.written_str(), "Q1\rQ1\rS2.0C0005\rQ1\r");
    }

    #[test]
    fn leaves_ups_alone_unless_configured() {
        let mut port = MockTransport::new().deliver(BATTERY_LOW);
        let mut ups = UPS::new(&mut port);
        let mut monitor = Monitor::new(&mut ups, MonitorSettings::default(), None).unwrap();
        monitor.poll().unwrap();
        drop(monitor);
        drop(ups);
        assert_eq!(port.written_str(), "Q1\r");
    }

    #[test]
    fn survives_timeouts_but_not_io_failures() {
        let mut port = MockTransport::new()
            .fail_read(std::io::ErrorKind::TimedOut)
            .deliver(b"garbage\r")
            .deliver(ONLINE)
            .fail_read(std::io::ErrorKind::BrokenPipe);
        let mut ups = UPS::new(&mut port);
        let mut monitor = Monitor::new(&mut ups, MonitorSettings::default(), None).unwrap();

        assert_eq!(monitor.poll().unwrap(), POLL_DELAY);
        assert!(monitor.communication_failed);
        assert_eq!(monitor.poll().unwrap(), POLL_DELAY);
        assert_eq!(monitor.poll().unwrap(), POLL_DELAY);
        assert!(!monitor.communication_failed);
        assert!(matches!(monitor.poll(), Err(UPSError::Io(_))));
    }

    #[test]
    fn rejects_unusable_shutdown_settings_up_front() {
        let mut port = MockTransport::new();
        let mut ups = UPS::new(&mut port);

        let settings = MonitorSettings {
            shutdown_on_battery_low: true,
            minutes_to_shutdown: 0.0,
            ..MonitorSettings::default()
        };
        assert!(matches!(
            Monitor::new(&mut ups, settings, None),
            Err(UPSError::InvalidParameter {
                name: "shutdown delay",
                ..
            })
        ));

        let settings = MonitorSettings {
            shutdown_on_battery_low: true,
            minutes_to_restore: 10000,
            ..MonitorSettings::default()
        };
        assert!(matches!(
            Monitor::new(&mut ups, settings, None),
            Err(UPSError::InvalidParameter {
                name: "restore minutes",
                ..
            })
        ));

        // Not checked when the monitor never sends it.
        let settings = MonitorSettings {
            minutes_to_shutdown: 0.0,
            ..MonitorSettings::default()
        };
        assert!(Monitor::new(&mut ups, settings, None).is_ok());
        drop(ups);
        assert!(port.written.is_empty());
    }

    #[test]
    fn shutdown_command_follows_restore_setting() {
        let settings = MonitorSettings::default();
        assert_eq!(settings.shutdown_command(), Command::Shutdown { delay: 2.0 });
        let settings = MonitorSettings {
            minutes_to_restore: 30,
            ..settings
        };
        assert_eq!(
            settings.shutdown_command(),
            Command::ShutdownRestore {
                delay: 2.0,
                restore: 30
            }
        );
    }

    #[test]
    fn keeps_fast_polling_on_battery_through_failures() {
        let mut port = MockTransport::new()
            .deliver(ON_BATTERY)
            .fail_read(std::io::ErrorKind::TimedOut)
            .deliver(b"garbage\r");
        let mut ups = UPS::new(&mut port);
        let mut monitor = Monitor::new(&mut ups, MonitorSettings::default(), None).unwrap();

        assert_eq!(monitor.poll().unwrap(), ON_BATTERY_POLL_DELAY);
        assert_eq!(monitor.poll().unwrap(), ON_BATTERY_POLL_DELAY);
        assert_eq!(monitor.poll().unwrap(), ON_BATTERY_POLL_DELAY);
    }
}
