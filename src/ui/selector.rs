//! Interactive menus

use crate::types::{MenuItem, VideoSummary};
use colored::Colorize;
use dialoguer::{theme::ColorfulTheme, Select};

/// Select an item from the menu; `None` when empty or dismissed
pub fn select<T: Clone>(items: &[MenuItem<T>], prompt: &str) -> Option<T> {
    if items.is_empty() {
        return None;
    }

    let labels: Vec<&str> = items.iter().map(|i| i.label.as_str()).collect();

    let selection = Select::with_theme(&ColorfulTheme::default())
        .with_prompt(prompt)
        .items(&labels)
        .default(0)
        .interact_opt()
        .ok()
        .flatten()?;

    items.get(selection).map(|item| item.value.clone())
}

/// `1:02:03` style duration, or `LIVE` when unknown
pub fn format_duration(seconds: Option<u64>) -> String {
    let Some(total) = seconds else {
        return "LIVE".into();
    };
    let (h, m, s) = (total / 3600, (total % 3600) / 60, total % 60);
    if h > 0 {
        format!("{}:{:02}:{:02}", h, m, s)
    } else {
        format!("{}:{:02}", m, s)
    }
}

/// Format video for display in selector
pub fn format_video_label(video: &VideoSummary) -> String {
    format!(
        "{} {} - {}",
        video.title,
        format!("[{}]", format_duration(video.duration)).dimmed(),
        video.channel_name.cyan()
    )
}

/// Menu of videos, valued by id
pub fn video_menu(videos: &[VideoSummary]) -> Vec<MenuItem<String>> {
    videos
        .iter()
        .map(|v| MenuItem {
            label: format_video_label(v),
            value: v.id.clone(),
        })
        .collect()
}
