//! Built-in demo experts.
//!
//! These exist so `convoke run` works out of the box against a live
//! planner: a memo keeper, a schedule formatter, and a translator stub.
//! Real deployments register their own [`Expert`] implementations.

use std::sync::Mutex;

use anyhow::Result;
use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use convoke_core::event::EventFn;
use convoke_core::{Expert, ExpertInfo, StaticExpertRegistry};

/// Keeps notes for the lifetime of the process and echoes them back.
#[derive(Default)]
pub struct MemoExpert {
    notes: Mutex<Vec<String>>,
}

#[async_trait]
impl Expert for MemoExpert {
    fn info(&self) -> ExpertInfo {
        ExpertInfo {
            name: "memo".to_string(),
            display_name: "备忘专家".to_string(),
            description: "Records notes, reminders, and to-dos; can recall what was noted earlier."
                .to_string(),
            capabilities: vec!["note_taking".to_string()],
            triggers: [(
                "note_taking".to_string(),
                vec![
                    "note".to_string(),
                    "memo".to_string(),
                    "笔记".to_string(),
                    "备忘".to_string(),
                ],
            )]
            .into_iter()
            .collect(),
        }
    }

    async fn execute(
        &self,
        _cancel: CancellationToken,
        input: &str,
        on_event: EventFn,
    ) -> Result<()> {
        let position = {
            let mut notes = self.notes.lock().unwrap();
            notes.push(input.to_string());
            notes.len()
        };
        on_event("content", &format!("已记录第 {position} 条备忘：{input}"));
        Ok(())
    }
}

/// Formats scheduling requests into a confirmation line.
pub struct ScheduleExpert;

#[async_trait]
impl Expert for ScheduleExpert {
    fn info(&self) -> ExpertInfo {
        ExpertInfo {
            name: "schedule".to_string(),
            display_name: "日程专家".to_string(),
            description: "Manages calendar entries: creating, moving, and listing appointments."
                .to_string(),
            capabilities: vec!["schedule_manage".to_string()],
            triggers: [(
                "schedule_manage".to_string(),
                vec![
                    "schedule".to_string(),
                    "calendar".to_string(),
                    "日程".to_string(),
                    "日历".to_string(),
                ],
            )]
            .into_iter()
            .collect(),
        }
    }

    async fn execute(
        &self,
        _cancel: CancellationToken,
        input: &str,
        on_event: EventFn,
    ) -> Result<()> {
        on_event("content", &format!("已安排日程：{input}"));
        Ok(())
    }
}

/// Stub translator: wraps the input rather than translating it, but
/// demonstrates capability-based handoff targets.
pub struct TranslateExpert;

#[async_trait]
impl Expert for TranslateExpert {
    fn info(&self) -> ExpertInfo {
        ExpertInfo {
            name: "translate".to_string(),
            display_name: "翻译专家".to_string(),
            description: "Translates text between Chinese and English.".to_string(),
            capabilities: vec!["translation".to_string()],
            triggers: [(
                "translation".to_string(),
                vec!["translate".to_string(), "翻译".to_string()],
            )]
            .into_iter()
            .collect(),
        }
    }

    async fn execute(
        &self,
        _cancel: CancellationToken,
        input: &str,
        on_event: EventFn,
    ) -> Result<()> {
        on_event("content", &format!("[translation] {input}"));
        Ok(())
    }
}

/// Registry with all demo experts registered.
pub fn demo_registry() -> StaticExpertRegistry {
    let mut registry = StaticExpertRegistry::new();
    registry.register(MemoExpert::default());
    registry.register(ScheduleExpert);
    registry.register(TranslateExpert);
    registry
}
