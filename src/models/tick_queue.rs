use std::collections::{BTreeMap, HashSet};

use tracing::debug;

use crate::models::common::DetectableId;

/// 既定の1回あたり最大処理件数
pub const DEFAULT_MAX_PROCESSED_PER_UPDATE: usize = 20;

/// キューに登録される周期処理アイテム
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TickedItem {
    pub key: DetectableId,
    pub tick_length: f64,
    pub next_tick: f64,
}

/// キューの統計情報
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct QueueStats {
    /// 累計処理件数
    pub processed_total: u64,
    /// 最大バックログ（処理しきれなかった期限到来アイテム数）
    pub max_backlog: usize,
    /// 実行回数
    pub updates: u64,
}

/// レート制限付きの周期処理キュー
///
/// 期限の到来したアイテムを`next_tick`の早い順に最大`max_processed_per_update`件
/// 取り出し、`now + tick_length`に再スケジュールします。処理しきれなかった
/// アイテムは期限到来のまま残り、次回以降に処理されます。
#[derive(Debug, Clone)]
pub struct TickedQueue {
    pub name: String,
    max_processed_per_update: usize,
    items: Vec<TickedItem>,
    pending_removal: HashSet<DetectableId>,
    stats: QueueStats,
}

impl TickedQueue {
    pub fn new(name: impl Into<String>, max_processed_per_update: usize) -> Self {
        Self {
            name: name.into(),
            max_processed_per_update: max_processed_per_update.max(1),
            items: Vec::new(),
            pending_removal: HashSet::new(),
            stats: QueueStats::default(),
        }
    }

    pub fn max_processed_per_update(&self) -> usize {
        self.max_processed_per_update
    }

    pub fn set_max_processed_per_update(&mut self, max: usize) {
        self.max_processed_per_update = max.max(1);
    }

    pub fn stats(&self) -> QueueStats {
        self.stats
    }

    /// 有効なアイテム数（削除予約分を除く）
    pub fn len(&self) -> usize {
        self.items
            .iter()
            .filter(|item| !self.pending_removal.contains(&item.key))
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains(&self, key: DetectableId) -> bool {
        !self.pending_removal.contains(&key) && self.items.iter().any(|item| item.key == key)
    }

    /// アイテムを追加（同じキーが既にあれば周期と次回時刻を更新）
    pub fn add(&mut self, key: DetectableId, tick_length: f64, next_tick: f64) {
        self.pending_removal.remove(&key);
        let tick_length = tick_length.max(0.0);
        if let Some(item) = self.items.iter_mut().find(|item| item.key == key) {
            item.tick_length = tick_length;
            item.next_tick = next_tick;
        } else {
            self.items.push(TickedItem {
                key,
                tick_length,
                next_tick,
            });
        }
    }

    /// 削除を予約（次の更新時に除去され、以降は処理されない）
    pub fn remove(&mut self, key: DetectableId) {
        if self.items.iter().any(|item| item.key == key) {
            self.pending_removal.insert(key);
        }
    }

    /// 期限の到来したアイテムを処理
    ///
    /// # 引数
    ///
    /// * `now` - 現在のシミュレーション時刻（秒）
    ///
    /// # 戻り値
    ///
    /// 今回処理すべきキーのリスト（処理順）
    pub fn update(&mut self, now: f64) -> Vec<DetectableId> {
        self.prune();
        self.stats.updates += 1;

        let mut due: Vec<usize> = self
            .items
            .iter()
            .enumerate()
            .filter(|(_, item)| item.next_tick <= now)
            .map(|(i, _)| i)
            .collect();
        due.sort_by(|&a, &b| {
            self.items[a]
                .next_tick
                .total_cmp(&self.items[b].next_tick)
                .then(self.items[a].key.cmp(&self.items[b].key))
        });

        let backlog = due.len().saturating_sub(self.max_processed_per_update);
        if backlog > 0 {
            debug!(
                "キュー'{}': 期限到来{}件のうち{}件を次回に持ち越し",
                self.name,
                due.len(),
                backlog
            );
        }
        self.stats.max_backlog = self.stats.max_backlog.max(backlog);

        let mut processed = Vec::with_capacity(due.len().min(self.max_processed_per_update));
        for index in due.into_iter().take(self.max_processed_per_update) {
            let item = &mut self.items[index];
            item.next_tick = now + item.tick_length;
            processed.push(item.key);
        }
        self.stats.processed_total += processed.len() as u64;
        processed
    }

    fn prune(&mut self) {
        if self.pending_removal.is_empty() {
            return;
        }
        let removal = std::mem::take(&mut self.pending_removal);
        self.items.retain(|item| !removal.contains(&item.key));
    }
}

/// 名前付きキューの集合
#[derive(Debug, Clone, Default)]
pub struct TickQueues {
    queues: BTreeMap<String, TickedQueue>,
}

impl TickQueues {
    pub fn new() -> Self {
        Self::default()
    }

    /// キューを定義（既存なら上限のみ更新）
    pub fn define(&mut self, name: &str, max_processed_per_update: usize) {
        self.queues
            .entry(name.to_string())
            .and_modify(|queue| queue.set_max_processed_per_update(max_processed_per_update))
            .or_insert_with(|| TickedQueue::new(name, max_processed_per_update));
    }

    /// 名前のキューを取得（存在しなければ既定の上限で作成）
    pub fn queue_mut(&mut self, name: &str) -> &mut TickedQueue {
        self.queues
            .entry(name.to_string())
            .or_insert_with(|| TickedQueue::new(name, DEFAULT_MAX_PROCESSED_PER_UPDATE))
    }

    pub fn get(&self, name: &str) -> Option<&TickedQueue> {
        self.queues.get(name)
    }

    /// 全キューからキーの削除を予約
    pub fn remove_everywhere(&mut self, key: DetectableId) {
        for queue in self.queues.values_mut() {
            queue.remove(key);
        }
    }

    /// 全キューを更新し、処理すべきキーを返す（キュー名順）
    pub fn update_all(&mut self, now: f64) -> Vec<DetectableId> {
        self.queues
            .values_mut()
            .flat_map(|queue| queue.update(now))
            .collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &TickedQueue> {
        self.queues.values()
    }
}
