//! Best-effort work after a task is finalized: email, gallery, archive.
//!
//! Each step reports a [`SideEffectOutcome`] and logs it; none of them can
//! undo or block finalization.

use fanout_db::models::status::TaskStatus;
use fanout_db::models::task::FinalizedTask;
use fanout_providers::gallery::GalleryEntry;
use serde::Serialize;

use crate::context::PipelineContext;

/// How one side effect went.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum SideEffectOutcome {
    Done { detail: String },
    Skipped { reason: String },
    Failed { error: String },
}

impl SideEffectOutcome {
    fn skipped(reason: &str) -> Self {
        Self::Skipped {
            reason: reason.to_string(),
        }
    }

    pub fn is_done(&self) -> bool {
        matches!(self, Self::Done { .. })
    }

    fn log(&self, task_id: i64, effect: &'static str) {
        match self {
            Self::Done { detail } => {
                tracing::info!(task_id, effect, detail = %detail, "Side effect done")
            }
            Self::Skipped { reason } => {
                tracing::debug!(task_id, effect, reason = %reason, "Side effect skipped")
            }
            Self::Failed { error } => {
                tracing::warn!(task_id, effect, error = %error, "Side effect failed")
            }
        }
    }
}

/// Email the task owner about the result.
pub async fn notify_owner(ctx: &PipelineContext, finalized: &FinalizedTask) -> SideEffectOutcome {
    let outcome = match &ctx.notifier {
        None => SideEffectOutcome::skipped("no notifier configured"),
        Some(notifier) => {
            let (subject, html) = render_email(finalized);
            match notifier.send(&finalized.user.email, &subject, &html).await {
                Ok(()) => SideEffectOutcome::Done {
                    detail: format!("sent to {}", finalized.user.email),
                },
                Err(e) => SideEffectOutcome::Failed {
                    error: e.to_string(),
                },
            }
        }
    };
    outcome.log(finalized.task.id, "email");
    outcome
}

/// Offer completed images to the public gallery.
pub async fn publish_gallery(
    ctx: &PipelineContext,
    finalized: &FinalizedTask,
) -> SideEffectOutcome {
    let task = &finalized.task;
    let outcome = match &ctx.gallery {
        None => SideEffectOutcome::skipped("no gallery configured"),
        Some(_) if task.image_urls.is_empty() => SideEffectOutcome::skipped("no images"),
        Some(gallery) => {
            let entry = GalleryEntry {
                task_id: task.id,
                user_id: task.user_id,
                prompt: &task.prompt,
                image_urls: &task.image_urls,
            };
            match gallery.publish(&entry).await {
                Ok(accepted) => SideEffectOutcome::Done {
                    detail: format!("{accepted} images published"),
                },
                Err(e) => SideEffectOutcome::Failed {
                    error: e.to_string(),
                },
            }
        }
    };
    outcome.log(task.id, "gallery");
    outcome
}

/// Build the ZIP archive of a completed task and attach its URL.
pub async fn package_archive(
    ctx: &PipelineContext,
    finalized: &FinalizedTask,
) -> SideEffectOutcome {
    let task = &finalized.task;
    let outcome = if task.status != TaskStatus::Completed || task.image_urls.is_empty() {
        SideEffectOutcome::skipped("no completed images")
    } else {
        match ctx.packager.build_zip(task.id, &task.image_urls).await {
            Ok(archive) => match ctx.store.set_zip_url(task.id, &archive.url).await {
                Ok(()) => SideEffectOutcome::Done {
                    detail: format!(
                        "{} of {} images archived at {}",
                        archive.included,
                        task.image_urls.len(),
                        archive.url
                    ),
                },
                Err(e) => SideEffectOutcome::Failed {
                    error: e.to_string(),
                },
            },
            Err(e) => SideEffectOutcome::Failed {
                error: e.to_string(),
            },
        }
    };
    outcome.log(task.id, "archive");
    outcome
}

/// Subject and HTML body for the completion email.
pub fn render_email(finalized: &FinalizedTask) -> (String, String) {
    let task = &finalized.task;
    let name = escape(finalized.user.display_name.as_deref().unwrap_or("there"));

    match task.status {
        TaskStatus::Failed => (
            "Your image generation failed".to_string(),
            format!(
                "<p>Hi {name},</p>\
                 <p>Unfortunately none of the {} images for \"{}\" could be generated.</p>\
                 <p>{} points have been returned to your balance.</p>",
                task.total_images,
                escape(&task.prompt),
                task.refunded_points,
            ),
        ),
        _ => {
            let mut body = format!(
                "<p>Hi {name},</p><p>{} images for \"{}\" are ready.</p><ul>",
                task.image_urls.len(),
                escape(&task.prompt),
            );
            for url in task.image_urls.iter().map(|u| escape(u)) {
                body.push_str(&format!("<li><a href=\"{url}\">{url}</a></li>"));
            }
            body.push_str("</ul>");
            if task.refunded_points > 0 {
                body.push_str(&format!(
                    "<p>Some images could not be generated; {} points have been returned to your balance.</p>",
                    task.refunded_points
                ));
            }
            ("Your images are ready".to_string(), body)
        }
    }
}

fn escape(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&#39;")
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use fanout_db::models::task::{Json, Task};
    use fanout_db::models::user::User;

    use super::*;

    fn finalized(status: TaskStatus, display_name: Option<&str>, urls: &[&str]) -> FinalizedTask {
        let now = Utc::now();
        FinalizedTask {
            task: Task {
                id: 7,
                user_id: 3,
                prompt: "a <b>bold</b> lighthouse".to_string(),
                model_configs: Json(Vec::new()),
                total_images: 2,
                total_points: 20,
                status,
                progress: 100,
                transaction_id: Some(1),
                image_urls: urls.iter().map(|u| u.to_string()).collect(),
                zip_url: None,
                failed_reason: None,
                refunded_points: 10,
                refunded_at: Some(now),
                created_at: now,
                updated_at: now,
                finished_at: Some(now),
            },
            user: User {
                id: 3,
                email: "owner@example.com".to_string(),
                display_name: display_name.map(str::to_string),
                points: 10,
                total_generations: 1,
                total_images: 1,
                created_at: now,
                updated_at: now,
            },
            refund_transaction: None,
        }
    }

    #[test]
    fn display_name_is_escaped() {
        let (_, html) = render_email(&finalized(
            TaskStatus::Completed,
            Some("<img src=x onerror=alert(1)>"),
            &["https://cdn/a.png"],
        ));
        assert!(!html.contains("<img"));
        assert!(html.contains("Hi &lt;img src=x onerror=alert(1)&gt;,"));

        let (_, html) = render_email(&finalized(TaskStatus::Failed, Some("<script>"), &[]));
        assert!(!html.contains("<script>"));
        assert!(html.contains("&lt;script&gt;"));
    }

    #[test]
    fn image_urls_cannot_break_out_of_href() {
        let (_, html) = render_email(&finalized(
            TaskStatus::Completed,
            None,
            &["https://cdn/a.png\" onmouseover=\"x"],
        ));
        assert!(!html.contains("\" onmouseover"));
        assert!(html.contains("href=\"https://cdn/a.png&quot; onmouseover=&quot;x\""));
    }

    #[test]
    fn partial_result_mentions_refund() {
        let (subject, html) =
            render_email(&finalized(TaskStatus::Completed, Some("Ada"), &["https://cdn/a.png"]));
        assert_eq!(subject, "Your images are ready");
        assert!(html.starts_with("<p>Hi Ada,</p>"));
        assert!(html.contains("a &lt;b&gt;bold&lt;/b&gt; lighthouse"));
        assert!(html.contains("10 points have been returned"));
    }
}
