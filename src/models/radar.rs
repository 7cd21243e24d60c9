use std::collections::BTreeSet;

use glam::DVec3;
use tracing::trace;

use crate::models::{
    common::{DetectableId, DetectableKind},
    spatial_index::SpatialIndex,
};

/// 既定の検知半径（メートル）
pub const DEFAULT_DETECTION_RADIUS: f64 = 5.0;
/// 既定の検知周期（秒）
pub const DEFAULT_TICK_LENGTH: f64 = 0.5;
/// 既定のキュー名
pub const DEFAULT_QUEUE_NAME: &str = "Radar";

/// レーダーの処理段階
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RadarState {
    /// 待機中
    Idle,
    /// 空間クエリ実行中
    Querying,
    /// 検知結果のフィルタリング中
    Filtering,
}

/// 1回の走査結果
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RadarSweep {
    /// 今回新たに検知したID
    pub newly_detected: Vec<DetectableId>,
    /// 前回検知していて今回失ったID
    pub lost: Vec<DetectableId>,
}

/// 周辺オブジェクトを検知するレーダー
///
/// 空間インデックスに対して球クエリを行い、結果をビークルと障害物に分類して
/// キャッシュします。走査はティックキューから周期的に呼び出されます。
#[derive(Debug, Clone)]
pub struct Radar {
    /// 所有者のID（自分自身は検知結果から除外）
    pub owner: DetectableId,
    /// 検知半径（メートル）
    pub detection_radius: f64,
    /// 走査周期（秒）
    pub tick_length: f64,
    /// 所属キュー名
    pub queue_name: String,
    /// 無効化されたビークルも検知するか
    pub detect_disabled_vehicles: bool,

    state: RadarState,
    detected: Vec<DetectableId>,
    vehicles: Vec<DetectableId>,
    obstacles: Vec<DetectableId>,
    tick_count: u64,
    last_tick_time: Option<f64>,
}

impl Radar {
    /// 既定パラメータのレーダーを作成
    pub fn new(owner: DetectableId) -> Self {
        Self {
            owner,
            detection_radius: DEFAULT_DETECTION_RADIUS,
            tick_length: DEFAULT_TICK_LENGTH,
            queue_name: DEFAULT_QUEUE_NAME.to_string(),
            detect_disabled_vehicles: false,
            state: RadarState::Idle,
            detected: Vec::new(),
            vehicles: Vec::new(),
            obstacles: Vec::new(),
            tick_count: 0,
            last_tick_time: None,
        }
    }

    pub fn set_detection_radius(&mut self, radius: f64) {
        self.detection_radius = radius.max(0.0);
    }

    pub fn set_tick_length(&mut self, tick_length: f64) {
        self.tick_length = tick_length.max(0.0);
    }

    pub fn state(&self) -> RadarState {
        self.state
    }

    /// 直近のクエリで検知した全ID（フィルタ前）
    pub fn detected(&self) -> &[DetectableId] {
        &self.detected
    }

    /// 検知したビークル
    pub fn vehicles(&self) -> &[DetectableId] {
        &self.vehicles
    }

    /// 検知した障害物
    pub fn obstacles(&self) -> &[DetectableId] {
        &self.obstacles
    }

    pub fn tick_count(&self) -> u64 {
        self.tick_count
    }

    pub fn last_tick_time(&self) -> Option<f64> {
        self.last_tick_time
    }

    /// 球クエリで周辺オブジェクトを検知
    pub fn detect(&mut self, index: &SpatialIndex, position: DVec3) -> &[DetectableId] {
        self.state = RadarState::Querying;
        self.detected = index.overlap_sphere(position, self.detection_radius);
        &self.detected
    }

    /// 検知結果をビークルと障害物に分類
    ///
    /// 自分自身と既にインデックスから外れたIDは除外します。無効化されたビークルは
    /// `detect_disabled_vehicles`がtrueの場合のみ含めます。
    pub fn filter(&mut self, index: &SpatialIndex) {
        self.state = RadarState::Filtering;
        self.vehicles.clear();
        self.obstacles.clear();

        for id in &self.detected {
            if *id == self.owner {
                continue;
            }
            let Some(object) = index.get(*id) else {
                continue;
            };
            match object.kind {
                DetectableKind::Vehicle => {
                    if object.enabled || self.detect_disabled_vehicles {
                        self.vehicles.push(*id);
                    }
                }
                DetectableKind::Obstacle => self.obstacles.push(*id),
            }
        }
        self.state = RadarState::Idle;
    }

    /// 走査（検知とフィルタリング）を1回実行
    ///
    /// # 引数
    ///
    /// * `index` - 空間インデックス
    /// * `position` - 所有者の現在位置
    /// * `now` - 現在時刻（秒）
    ///
    /// # 戻り値
    ///
    /// 新規検知とロストの一覧
    pub fn sweep(&mut self, index: &SpatialIndex, position: DVec3, now: f64) -> RadarSweep {
        let previous: BTreeSet<DetectableId> =
            self.vehicles.iter().chain(self.obstacles.iter()).copied().collect();

        self.detect(index, position);
        self.filter(index);
        self.tick_count += 1;
        self.last_tick_time = Some(now);

        let current: BTreeSet<DetectableId> =
            self.vehicles.iter().chain(self.obstacles.iter()).copied().collect();
        let sweep = RadarSweep {
            newly_detected: current.difference(&previous).copied().collect(),
            lost: previous.difference(&current).copied().collect(),
        };

        for id in &sweep.newly_detected {
            trace!("レーダー{}: {}を検知 (t={:.2}s)", self.owner, id, now);
        }
        for id in &sweep.lost {
            trace!("レーダー{}: {}をロスト (t={:.2}s)", self.owner, id, now);
        }
        sweep
    }

    /// キャッシュをクリア
    pub fn clear(&mut self) {
        self.detected.clear();
        self.vehicles.clear();
        self.obstacles.clear();
        self.state = RadarState::Idle;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{common::vec3, detectable::DetectableObject};

    fn build_index() -> SpatialIndex {
        let mut index = SpatialIndex::new(2.0);
        index.register(DetectableObject::new(DetectableId(1), DetectableKind::Vehicle, DVec3::ZERO, 0.5));
        index.register(DetectableObject::new(DetectableId(2), DetectableKind::Vehicle, vec3(2.0, 0.0, 0.0), 0.5));
        index.register(DetectableObject::new(DetectableId(3), DetectableKind::Obstacle, vec3(0.0, 0.0, 3.0), 1.0));
        index.register(DetectableObject::new(DetectableId(4), DetectableKind::Vehicle, vec3(50.0, 0.0, 0.0), 0.5));
        index
    }

    #[test]
    fn test_filter_splits_vehicles_and_obstacles_and_excludes_self() {
        let index = build_index();
        let mut radar = Radar::new(DetectableId(1));
        radar.sweep(&index, DVec3::ZERO, 0.0);
        assert_eq!(radar.vehicles(), &[DetectableId(2)]);
        assert_eq!(radar.obstacles(), &[DetectableId(3)]);
        assert!(radar.detected().contains(&DetectableId(1)));
        assert_eq!(radar.state(), RadarState::Idle);
        assert_eq!(radar.tick_count(), 1);
    }

    #[test]
    fn test_disabled_vehicles_are_optional() {
        let mut index = build_index();
        index.set_enabled(DetectableId(2), false);
        let mut radar = Radar::new(DetectableId(1));
        radar.sweep(&index, DVec3::ZERO, 0.0);
        assert!(radar.vehicles().is_empty());

        radar.detect_disabled_vehicles = true;
        radar.sweep(&index, DVec3::ZERO, 0.5);
        assert_eq!(radar.vehicles(), &[DetectableId(2)]);
    }

    #[test]
    fn test_destroyed_ids_are_dropped() {
        let mut index = build_index();
        let mut radar = Radar::new(DetectableId(1));
        radar.detect(&index, DVec3::ZERO);
        index.deregister(DetectableId(2));
        radar.filter(&index);
        assert!(radar.vehicles().is_empty());
    }

    #[test]
    fn test_sweep_reports_new_and_lost() {
        let mut index = build_index();
        let mut radar = Radar::new(DetectableId(1));
        let first = radar.sweep(&index, DVec3::ZERO, 0.0);
        assert_eq!(first.newly_detected, vec![DetectableId(2), DetectableId(3)]);

        index.update(DetectableId(2), |o| o.position = vec3(40.0, 0.0, 0.0));
        let second = radar.sweep(&index, DVec3::ZERO, 0.5);
        assert_eq!(second.lost, vec![DetectableId(2)]);
        assert!(second.newly_detected.is_empty());
        assert_eq!(radar.last_tick_time(), Some(0.5));
    }
}
