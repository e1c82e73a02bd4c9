//! Instance status → status embed.

use crate::channels::{Color, Reply};
use crate::cloud::{InstanceInfo, InstanceStatus};

pub fn status_reply(title: &str, info: Option<&InstanceInfo>) -> Reply {
    let (color, description) = match info {
        None => (
            Color::Orange,
            "No instance found. Try deploying using the terraform repo again.".to_string(),
        ),
        Some(info) => match info.status {
            InstanceStatus::Running => (
                Color::Green,
                format!(
                    "Server is running (IP: {})!",
                    info.address.as_deref().unwrap_or("unassigned")
                ),
            ),
            InstanceStatus::Stopped | InstanceStatus::Terminated => {
                (Color::Red, "Server has stopped.".to_string())
            }
            InstanceStatus::Stopping => (Color::Red, "Server is stopping.".to_string()),
            InstanceStatus::Suspended => (Color::Red, "Server is suspended.".to_string()),
            InstanceStatus::Suspending => (Color::Red, "Server is suspending.".to_string()),
            InstanceStatus::Provisioning | InstanceStatus::Staging => {
                (Color::Orange, "Server is starting.".to_string())
            }
            InstanceStatus::Repairing => (Color::Orange, "Server is being repaired.".to_string()),
        },
    };
    Reply::embed(title)
        .with_color(color)
        .with_description(description)
}
