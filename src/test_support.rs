//! Shared fakes for unit tests.

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

use crate::channels::{GuildDirectory, MessageRef, Notifier, Reply};
use crate::cloud::{
    GatewayError, InstanceGateway, InstanceInfo, InstanceRef, InstanceStatus, OperationHandle,
    OperationStatus,
};
use crate::infra::Clock;

/// Scripted gateway that records every call.
pub struct FakeGateway {
    polls_until_done: AtomicU32,
    poll_count: AtomicU32,
    poll_error: Option<String>,
    start_error: Option<String>,
    stop_error: Option<String>,
    operation_error: Option<String>,
    instance: Mutex<Option<InstanceInfo>>,
    calls: Mutex<Vec<String>>,
}

impl FakeGateway {
    /// Every operation is already done on the first poll.
    pub fn new() -> Self {
        Self {
            polls_until_done: AtomicU32::new(0),
            poll_count: AtomicU32::new(0),
            poll_error: None,
            start_error: None,
            stop_error: None,
            operation_error: None,
            instance: Mutex::new(Some(InstanceInfo {
                status: InstanceStatus::Running,
                address: Some("10.0.0.1".into()),
            })),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Report `done` only after `polls` unfinished polls.
    pub fn finishing_after(self, polls: u32) -> Self {
        self.polls_until_done.store(polls, Ordering::SeqCst);
        self
    }

    pub fn failing_polls(mut self, message: &str) -> Self {
        self.poll_error = Some(message.into());
        self
    }

    pub fn rejecting_start(mut self, message: &str) -> Self {
        self.start_error = Some(message.into());
        self
    }

    pub fn rejecting_stop(mut self, message: &str) -> Self {
        self.stop_error = Some(message.into());
        self
    }

    /// Operations finish, but carry `message` as their error.
    pub fn finishing_with_error(mut self, message: &str) -> Self {
        self.operation_error = Some(message.into());
        self
    }

    pub fn with_instance(self, instance: Option<InstanceInfo>) -> Self {
        *self.instance.lock() = instance;
        self
    }

    pub fn poll_count(&self) -> u32 {
        self.poll_count.load(Ordering::SeqCst)
    }

    /// `"start"`/`"stop"` calls in order.
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().clone()
    }

    pub fn count(&self, call: &str) -> usize {
        self.calls.lock().iter().filter(|c| *c == call).count()
    }
}

fn rejected(message: &str) -> GatewayError {
    GatewayError::Rejected {
        status: 400,
        message: message.into(),
    }
}

#[async_trait]
impl InstanceGateway for FakeGateway {
    async fn start(&self, _target: &InstanceRef) -> Result<OperationHandle, GatewayError> {
        self.calls.lock().push("start".into());
        match &self.start_error {
            Some(message) => Err(rejected(message)),
            None => Ok(OperationHandle("op-start".into())),
        }
    }

    async fn stop(&self, _target: &InstanceRef) -> Result<OperationHandle, GatewayError> {
        self.calls.lock().push("stop".into());
        match &self.stop_error {
            Some(message) => Err(rejected(message)),
            None => Ok(OperationHandle("op-stop".into())),
        }
    }

    async fn operation_status(
        &self,
        _target: &InstanceRef,
        _operation: &OperationHandle,
    ) -> Result<OperationStatus, GatewayError> {
        self.poll_count.fetch_add(1, Ordering::SeqCst);
        if let Some(message) = &self.poll_error {
            return Err(GatewayError::Transport(message.clone()));
        }
        let remaining = self.polls_until_done.load(Ordering::SeqCst);
        if remaining > 0 {
            self.polls_until_done.store(remaining - 1, Ordering::SeqCst);
            return Ok(OperationStatus {
                done: false,
                error: None,
            });
        }
        Ok(OperationStatus {
            done: true,
            error: self.operation_error.clone(),
        })
    }

    async fn get_instance(
        &self,
        _target: &InstanceRef,
    ) -> Result<Option<InstanceInfo>, GatewayError> {
        Ok(self.instance.lock().clone())
    }

    fn name(&self) -> &str {
        "fake"
    }
}

/// Notifier and guild directory that keep everything they are handed.
pub struct RecordingNotifier {
    emitted: Mutex<Vec<Reply>>,
    edited: Mutex<Vec<(MessageRef, Reply)>>,
    next_id: AtomicU64,
    roles: HashMap<String, String>,
    members: Option<HashSet<u64>>,
}

impl RecordingNotifier {
    /// No roles; everyone is a member.
    pub fn new() -> Self {
        Self {
            emitted: Mutex::new(Vec::new()),
            edited: Mutex::new(Vec::new()),
            next_id: AtomicU64::new(1),
            roles: HashMap::new(),
            members: None,
        }
    }

    pub fn with_role(mut self, name: &str, id: u64) -> Self {
        self.roles.insert(name.to_string(), format!("<@&{id}>"));
        self
    }

    /// Only these user ids are members.
    pub fn with_members(mut self, ids: &[u64]) -> Self {
        self.members = Some(ids.iter().copied().collect());
        self
    }

    pub fn replies(&self) -> Vec<Reply> {
        self.emitted.lock().clone()
    }

    /// Description (or content, for plain text) of every emitted message.
    pub fn descriptions(&self) -> Vec<String> {
        self.emitted.lock().iter().map(summary).collect()
    }

    /// Description of every edit, in order.
    pub fn edits(&self) -> Vec<String> {
        self.edited.lock().iter().map(|(_, r)| summary(r)).collect()
    }

    /// Whether any emitted message mentions `needle`.
    pub fn saw(&self, needle: &str) -> bool {
        self.descriptions().iter().any(|d| d.contains(needle))
    }
}

fn summary(reply: &Reply) -> String {
    reply
        .description
        .clone()
        .or_else(|| reply.content.clone())
        .or_else(|| reply.title.clone())
        .unwrap_or_default()
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn emit(&self, reply: &Reply) -> Result<MessageRef> {
        self.emitted.lock().push(reply.clone());
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        Ok(MessageRef {
            channel: "test".into(),
            id: id.to_string(),
        })
    }

    async fn edit(&self, message: &MessageRef, reply: &Reply) -> Result<()> {
        self.edited.lock().push((message.clone(), reply.clone()));
        Ok(())
    }

    fn name(&self) -> &str {
        "recording"
    }
}

#[async_trait]
impl GuildDirectory for RecordingNotifier {
    async fn role_mention(&self, role_name: &str) -> Result<Option<String>> {
        Ok(self.roles.get(role_name).cloned())
    }

    async fn is_member(&self, user_id: u64) -> Result<bool> {
        Ok(self
            .members
            .as_ref()
            .map_or(true, |members| members.contains(&user_id)))
    }
}

/// Clock pinned to a settable instant.
pub struct FixedClock {
    now: Mutex<DateTime<Utc>>,
}

impl FixedClock {
    pub fn at(now: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(now),
        }
    }

    pub fn set(&self, now: DateTime<Utc>) {
        *self.now.lock() = now;
    }
}

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock()
    }

    fn name(&self) -> &str {
        "fixed"
    }
}
