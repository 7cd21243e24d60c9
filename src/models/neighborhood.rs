use glam::DVec3;

use crate::models::{
    common::{DetectableId, math_utils},
    spatial_index::SpatialIndex,
};

/// 近傍判定
///
/// 最小半径以内は向きに関係なく近傍、最大半径以上は近傍外、その間は
/// 観測者の前方向と相手方向のなす角の余弦が`angle_cos`以上の場合に近傍とします。
///
/// # 引数
///
/// * `observer_position` - 観測者の位置
/// * `observer_forward` - 観測者の前方向（単位ベクトル）
/// * `candidate_position` - 判定対象の位置
/// * `min_radius` - 最小半径
/// * `max_radius` - 最大半径
/// * `angle_cos` - 視野角の余弦
pub fn is_in_neighborhood(
    observer_position: DVec3,
    observer_forward: DVec3,
    candidate_position: DVec3,
    min_radius: f64,
    max_radius: f64,
    angle_cos: f64,
) -> bool {
    let offset = candidate_position - observer_position;
    let distance_squared = offset.length_squared();

    if distance_squared <= min_radius * min_radius {
        return true;
    }
    if distance_squared >= max_radius * max_radius {
        return false;
    }
    let unit_offset = offset / distance_squared.sqrt();
    observer_forward.dot(unit_offset) >= angle_cos
}

/// 近傍設定
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NeighborhoodConfig {
    min_radius: f64,
    max_radius: f64,
    angle_cos: f64,
}

impl Default for NeighborhoodConfig {
    fn default() -> Self {
        Self {
            min_radius: 3.0,
            max_radius: 7.5,
            angle_cos: -0.707,
        }
    }
}

impl NeighborhoodConfig {
    pub fn new(min_radius: f64, max_radius: f64, angle_deg: f64) -> Self {
        let mut config = Self::default();
        config.set_radii(min_radius, max_radius);
        config.set_angle_deg(angle_deg);
        config
    }

    pub fn min_radius(&self) -> f64 {
        self.min_radius
    }

    pub fn max_radius(&self) -> f64 {
        self.max_radius
    }

    pub fn angle_cos(&self) -> f64 {
        self.angle_cos
    }

    /// 半径を設定（負値は0、max < minの場合はmax = min）
    pub fn set_radii(&mut self, min_radius: f64, max_radius: f64) {
        self.min_radius = min_radius.max(0.0);
        self.max_radius = max_radius.max(self.min_radius);
    }

    pub fn set_angle_cos(&mut self, angle_cos: f64) {
        self.angle_cos = math_utils::clip(angle_cos, -1.0, 1.0);
    }

    pub fn angle_deg(&self) -> f64 {
        math_utils::degrees_from_cos(self.angle_cos)
    }

    pub fn set_angle_deg(&mut self, angle_deg: f64) {
        self.set_angle_cos(math_utils::cos_from_degrees(angle_deg));
    }

    /// 候補が近傍内かどうか
    pub fn contains(&self, observer_position: DVec3, observer_forward: DVec3, candidate: DVec3) -> bool {
        is_in_neighborhood(
            observer_position,
            observer_forward,
            candidate,
            self.min_radius,
            self.max_radius,
            self.angle_cos,
        )
    }
}

/// レーダー走査結果から近傍リストを再計算
///
/// # 引数
///
/// * `owner` - 観測者のID（自分自身は除外）
/// * `observer_position` - 観測者の位置
/// * `observer_forward` - 観測者の前方向
/// * `candidates` - レーダーが検知したビークルID
/// * `index` - 空間インデックス
/// * `config` - 近傍設定
///
/// # 戻り値
///
/// 近傍にあるビークルIDのリスト
pub fn refresh_neighbors(
    owner: DetectableId,
    observer_position: DVec3,
    observer_forward: DVec3,
    candidates: &[DetectableId],
    index: &SpatialIndex,
    config: &NeighborhoodConfig,
) -> Vec<DetectableId> {
    candidates
        .iter()
        .filter(|id| **id != owner)
        .filter_map(|id| index.get(*id))
        .filter(|object| config.contains(observer_position, observer_forward, object.position))
        .map(|object| object.id)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{
        common::{DetectableKind, vec3},
        detectable::DetectableObject,
    };

    #[test]
    fn test_boundaries() {
        let forward = DVec3::Z;
        // 最小半径ちょうどは後方でも近傍
        assert!(is_in_neighborhood(DVec3::ZERO, forward, vec3(0.0, 0.0, -1.0), 1.0, 5.0, 0.9));
        // 最大半径ちょうどは近傍外
        assert!(!is_in_neighborhood(DVec3::ZERO, forward, vec3(0.0, 0.0, 5.0), 1.0, 5.0, -1.0));
        // 中間領域は角度で判定
        assert!(is_in_neighborhood(DVec3::ZERO, forward, vec3(0.0, 0.0, 3.0), 1.0, 5.0, 0.9));
        assert!(!is_in_neighborhood(DVec3::ZERO, forward, vec3(3.0, 0.0, 0.0), 1.0, 5.0, 0.9));
    }

    #[test]
    fn test_config_clamps() {
        let config = NeighborhoodConfig::new(5.0, 2.0, 90.0);
        assert_eq!(config.min_radius(), 5.0);
        assert_eq!(config.max_radius(), 5.0);
        assert!(config.angle_cos().abs() < 1e-12);
        assert!((config.angle_deg() - 90.0).abs() < 1e-9);

        let mut config = NeighborhoodConfig::default();
        config.set_angle_cos(3.0);
        assert_eq!(config.angle_cos(), 1.0);
    }

    #[test]
    fn test_refresh_neighbors_excludes_owner() {
        let mut index = SpatialIndex::default();
        for (id, x) in [(1, 0.0), (2, 1.0), (3, 20.0)] {
            index.register(DetectableObject::new(DetectableId(id), DetectableKind::Vehicle, vec3(x, 0.0, 0.0), 0.5));
        }
        let config = NeighborhoodConfig::new(2.0, 10.0, 180.0);
        let candidates = [DetectableId(1), DetectableId(2), DetectableId(3), DetectableId(9)];
        let neighbors = refresh_neighbors(DetectableId(1), DVec3::ZERO, DVec3::Z, &candidates, &index, &config);
        assert_eq!(neighbors, vec![DetectableId(2)]);
    }
}
