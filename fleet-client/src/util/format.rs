use chrono::{DateTime, Utc};
use fleet_shared::{application::Application, device::Device};

const RESET: &str = "\x1b[0m";
const BOLD: &str = "\x1b[1m";
const DIM: &str = "\x1b[2m";

const RED: &str = "\x1b[31m";
const GREEN: &str = "\x1b[32m";

fn dim(s: &str) -> String {
    format!("{DIM}{s}{RESET}")
}
fn green(s: &str) -> String {
    format!("{GREEN}{s}{RESET}")
}
fn red(s: &str) -> String {
    format!("{RED}{s}{RESET}")
}
fn bold(s: &str) -> String {
    format!("{BOLD}{s}{RESET}")
}

fn status_badge(online: bool) -> String {
    if online {
        green("online")
    } else {
        red("offline")
    }
}

fn visible_len(s: &str) -> usize {
    // ANSI CSI sequences (\x1b[ ... m) take no columns
    let mut n = 0usize;
    let mut chars = s.chars().peekable();
    while let Some(c) = chars.next() {
        if c == '\x1b' && chars.peek() == Some(&'[') {
            chars.next();
            for x in chars.by_ref() {
                if x == 'm' {
                    break;
                }
            }
            continue;
        }
        n += 1;
    }
    n
}

fn pad_cell(s: &str, width: usize) -> String {
    let vis = visible_len(s);
    if vis >= width {
        s.to_string()
    } else {
        let mut out = String::with_capacity(s.len() + (width - vis));
        out.push_str(s);
        out.extend(std::iter::repeat_n(' ', width - vis));
        out
    }
}

/// Pad every cell but the last to its column width.
fn row(cells: &[(&str, usize)], tail: &str) -> String {
    let mut out = String::new();
    for (cell, width) in cells {
        out.push_str(&pad_cell(cell, *width));
        out.push(' ');
    }
    out.push_str(tail);
    out
}

fn truncate_str(s: &str, max: usize) -> String {
    if s.chars().count() > max {
        format!("{}...", s.chars().take(max.saturating_sub(3)).collect::<String>())
    } else {
        s.to_string()
    }
}

/// Relative age of a timestamp, e.g. "2 min ago" or "3 days ago".
fn format_relative_time(time: &DateTime<Utc>, now: DateTime<Utc>) -> String {
    let duration = now.signed_duration_since(*time);

    let secs = duration.num_seconds();
    if secs < 0 {
        return "just now".to_string();
    }
    if secs < 60 {
        return format!("{} sec ago", secs);
    }

    let mins = duration.num_minutes();
    if mins < 60 {
        return format!("{} min ago", mins);
    }

    let hours = duration.num_hours();
    if hours < 24 {
        return format!("{} hour{} ago", hours, if hours == 1 { "" } else { "s" });
    }

    let days = duration.num_days();
    format!("{} day{} ago", days, if days == 1 { "" } else { "s" })
}

fn last_seen(device: &Device) -> String {
    device
        .last_seen
        .as_ref()
        .map(|t| format_relative_time(t, Utc::now()))
        .unwrap_or_else(|| "-".to_string())
}

pub fn print_devices_table(devices: &[Device]) {
    if devices.is_empty() {
        println!("{}", dim("No devices found"));
        return;
    }

    const WIDTH_ID: usize = 8;
    const WIDTH_NAME: usize = 20;
    const WIDTH_TYPE: usize = 18;
    const WIDTH_STATUS: usize = 8;
    const WIDTH_APP: usize = 18;
    const WIDTH_IP: usize = 16;

    println!("{}", bold("Devices"));
    println!(
        "  {}",
        row(
            &[
                (&dim("UUID"), WIDTH_ID),
                (&dim("NAME"), WIDTH_NAME),
                (&dim("TYPE"), WIDTH_TYPE),
                (&dim("STATUS"), WIDTH_STATUS),
                (&dim("APPLICATION"), WIDTH_APP),
                (&dim("IP"), WIDTH_IP),
            ],
            &dim("LAST SEEN"),
        )
    );

    for device in devices {
        let name = truncate_str(&device.name, WIDTH_NAME - 1);
        let application = truncate_str(&device.application_name, WIDTH_APP - 1);
        println!(
            "  {}",
            row(
                &[
                    (device.short_uuid(), WIDTH_ID),
                    (&name, WIDTH_NAME),
                    (&device.device_type, WIDTH_TYPE),
                    (&status_badge(device.is_online), WIDTH_STATUS),
                    (&application, WIDTH_APP),
                    (device.ip_address.as_deref().unwrap_or("-"), WIDTH_IP),
                ],
                &last_seen(device),
            )
        );
    }
}

pub fn print_device(device: &Device) {
    println!("{} {}", "Device", bold(&device.name));

    let fields: [(&str, String); 9] = [
        ("UUID", device.uuid.clone()),
        ("TYPE", device.device_type.clone()),
        ("APPLICATION", device.application_name.clone()),
        ("STATUS", device.status.clone().unwrap_or_else(|| "-".into())),
        ("ONLINE", status_badge(device.is_online)),
        ("IP ADDRESS", device.ip_address.clone().unwrap_or_else(|| "-".into())),
        ("LAST SEEN", last_seen(device)),
        (
            "SUPERVISOR",
            device
                .supervisor_version
                .clone()
                .unwrap_or_else(|| "-".into()),
        ),
        ("NOTE", device.note.clone().unwrap_or_else(|| "-".into())),
    ];
    for (label, value) in fields {
        println!("  {}", row(&[(&dim(label), 14)], &value));
    }
}

pub fn print_applications_table(applications: &[Application]) {
    if applications.is_empty() {
        println!("{}", dim("No applications found"));
        return;
    }

    println!("{}", bold("Applications"));
    println!(
        "  {}",
        row(&[(&dim("ID"), 8), (&dim("NAME"), 24)], &dim("DEVICE TYPE"))
    );
    for app in applications {
        println!(
            "  {}",
            row(
                &[
                    (&app.id.to_string(), 8),
                    (&truncate_str(&app.name, 23), 24)
                ],
                &app.device_type,
            )
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_pad_cell_ignores_ansi_codes() {
        let badge = status_badge(true);
        assert_eq!(visible_len(&badge), "online".len());
        let padded = pad_cell(&badge, 8);
        assert_eq!(visible_len(&padded), 8);
        assert!(padded.starts_with(GREEN));
    }

    #[test]
    fn test_row_pads_all_but_tail() {
        let line = row(&[("ab", 4), ("c", 2)], "tail");
        assert_eq!(line, "ab   c  tail");
    }

    #[test]
    fn test_truncate_str() {
        assert_eq!(truncate_str("short", 10), "short");
        assert_eq!(truncate_str("a-very-long-device-name", 10), "a-very-...");
    }

    #[test]
    fn test_format_relative_time() {
        let now = Utc::now();
        assert_eq!(format_relative_time(&(now - Duration::seconds(5)), now), "5 sec ago");
        assert_eq!(format_relative_time(&(now - Duration::minutes(2)), now), "2 min ago");
        assert_eq!(format_relative_time(&(now - Duration::hours(1)), now), "1 hour ago");
        assert_eq!(format_relative_time(&(now - Duration::days(3)), now), "3 days ago");
        assert_eq!(format_relative_time(&(now + Duration::seconds(5)), now), "just now");
    }
}
