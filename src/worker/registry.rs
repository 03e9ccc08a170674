//! ワーカーレジストリ
//!
//! [`WorkerKind`] をキーに [`Worker`] を保持します。
//! 種別は閉じた列挙型なので、未登録の種別を [`WorkerRegistry::missing_kinds`] で列挙できます。

use std::collections::HashMap;
use std::sync::Arc;

use crate::config::Settings;
use crate::provider::InferenceClient;
use crate::workflow::task::WorkerKind;
use super::prompt::PromptWorker;
use super::report::ReportWorker;
use super::traits::Worker;

#[derive(Default, Clone)]
pub struct WorkerRegistry {
    workers: HashMap<WorkerKind, Arc<dyn Worker>>,
}

impl WorkerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// 同梱ワーカーで全種別を埋めたレジストリ
    ///
    /// [`WorkerKind::Report`] には [`ReportWorker`]、それ以外には
    /// 種別ごとの [`PromptWorker`] を登録します。
    pub fn bundled(client: Arc<dyn InferenceClient>, settings: &Settings) -> Self {
        let mut registry = Self::new();
        for kind in WorkerKind::ALL {
            let worker: Arc<dyn Worker> = match kind {
                WorkerKind::Report => Arc::new(ReportWorker::new(Some(Arc::clone(&client)))),
                kind => Arc::new(
                    PromptWorker::new(kind, Arc::clone(&client))
                        .with_schemas_dir(&settings.paths().schemas_dir)
                        .with_internet_context(settings.inference().add_context_from_internet),
                ),
            };
            registry.register(worker);
        }
        registry
    }

    /// ワーカーを登録する
    ///
    /// 同じ種別のワーカーが既にあれば置き換え、以前のワーカーを返します。
    pub fn register(&mut self, worker: Arc<dyn Worker>) -> Option<Arc<dyn Worker>> {
        self.workers.insert(worker.kind(), worker)
    }

    pub fn get(&self, kind: WorkerKind) -> Option<Arc<dyn Worker>> {
        self.workers.get(&kind).cloned()
    }

    /// 登録済みの種別（[`WorkerKind::ALL`] の順）
    pub fn kinds(&self) -> Vec<WorkerKind> {
        WorkerKind::ALL
            .into_iter()
            .filter(|kind| self.workers.contains_key(kind))
            .collect()
    }

    /// ワーカーが登録されていない種別
    pub fn missing_kinds(&self) -> Vec<WorkerKind> {
        WorkerKind::ALL
            .into_iter()
            .filter(|kind| !self.workers.contains_key(kind))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.workers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.workers.is_empty()
    }
}
