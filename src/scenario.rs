use glam::DVec3;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::models::{path_following::FollowDirection, pathway::PathwayKind};

/// シナリオメタデータ
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ScenarioMeta {
    pub version: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
}

/// シミュレーション設定
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SimulationConfig {
    pub dt_s: f64,
    pub t_max_s: f64,
    #[serde(default)]
    pub seed: u64,
    /// ステップ数の上限（省略時は時間のみで終了）
    #[serde(default)]
    pub max_steps: Option<u64>,
}

/// 世界設定
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct WorldConfig {
    /// 空間インデックスのセルサイズ
    #[serde(default = "default_cell_size")]
    pub cell_size_m: f64,
    /// ティックキューの定義
    #[serde(default)]
    pub queues: Vec<QueueConfig>,
    /// 原点中心の球状の世界の半径（外に出たビークルは反対側へ折り返す）
    #[serde(default)]
    pub wrap_radius_m: Option<f64>,
}

impl Default for WorldConfig {
    fn default() -> Self {
        Self {
            cell_size_m: default_cell_size(),
            queues: Vec::new(),
            wrap_radius_m: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct QueueConfig {
    pub name: String,
    pub max_processed_per_update: usize,
}

#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq)]
pub struct Position3D {
    pub x_m: f64,
    pub y_m: f64,
    pub z_m: f64,
}

impl Position3D {
    pub fn to_vec(&self) -> DVec3 {
        DVec3::new(self.x_m, self.y_m, self.z_m)
    }

    fn is_finite(&self) -> bool {
        self.to_vec().is_finite()
    }
}

/// 経路設定
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PathwayConfig {
    pub id: String,
    #[serde(default)]
    pub kind: PathwayKind,
    pub radius_m: f64,
    pub points: Vec<Position3D>,
}

/// 球形障害物設定
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ObstacleConfig {
    pub id: String,
    pub position: Position3D,
    pub radius_m: f64,
}

/// レーダー設定
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RadarConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_detection_radius")]
    pub detection_radius_m: f64,
    #[serde(default = "default_tick_length")]
    pub tick_length_s: f64,
    #[serde(default = "default_queue_name")]
    pub queue: String,
    #[serde(default)]
    pub detect_disabled_vehicles: bool,
}

impl Default for RadarConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            detection_radius_m: default_detection_radius(),
            tick_length_s: default_tick_length(),
            queue: default_queue_name(),
            detect_disabled_vehicles: false,
        }
    }
}

/// 近傍判定設定
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct NeighborhoodSettings {
    #[serde(default = "default_neighborhood_min")]
    pub min_radius_m: f64,
    #[serde(default = "default_neighborhood_max")]
    pub max_radius_m: f64,
    /// 前方向からの視野角（度）
    #[serde(default = "default_neighborhood_angle")]
    pub angle_deg: f64,
}

impl Default for NeighborhoodSettings {
    fn default() -> Self {
        Self {
            min_radius_m: default_neighborhood_min(),
            max_radius_m: default_neighborhood_max(),
            angle_deg: default_neighborhood_angle(),
        }
    }
}

/// 操舵行動の設定
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct BehaviorConfig {
    #[serde(flatten)]
    pub kind: BehaviorKind,
    #[serde(default = "default_weight")]
    pub weight: f64,
}

/// 操舵行動の種類ごとのパラメータ
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BehaviorKind {
    Separation,
    Alignment,
    Cohesion,
    MatchingVelocity,
    Pursuit {
        quarry: String,
        #[serde(default)]
        acceptable_distance_m: f64,
        #[serde(default = "default_max_prediction_time")]
        max_prediction_time_s: f64,
        #[serde(default)]
        slowing_distance_m: Option<f64>,
    },
    Evasion {
        menaces: Vec<String>,
        #[serde(default = "default_safety_distance")]
        safety_distance_m: f64,
        #[serde(default = "default_evasion_prediction_time")]
        prediction_time_s: f64,
    },
    PathFollow {
        pathway: String,
        #[serde(default = "default_path_prediction_time")]
        prediction_time_s: f64,
        #[serde(default = "default_min_speed_to_consider")]
        min_speed_mps: f64,
    },
    PathFollowPredictive {
        pathway: String,
        #[serde(default)]
        direction: FollowDirection,
        #[serde(default = "default_predictive_prediction_time")]
        prediction_time_s: f64,
    },
    Wander {
        #[serde(default = "default_wander_latitude")]
        max_latitude_side: f64,
        #[serde(default = "default_wander_latitude")]
        max_latitude_up: f64,
        #[serde(default = "default_wander_smooth_rate")]
        smooth_rate: f64,
    },
    ObstacleAvoidance {
        #[serde(default = "default_min_time_to_collision")]
        min_time_to_collision_s: f64,
        #[serde(default = "default_avoidance_force_factor")]
        avoidance_force_factor: f64,
    },
    NeighborAvoidance {
        #[serde(default = "default_avoid_angle_cos")]
        avoid_angle_cos: f64,
        #[serde(default = "default_min_time_to_collision")]
        min_time_to_collision_s: f64,
    },
    Tether {
        position: Position3D,
        #[serde(default = "default_tether_distance")]
        maximum_distance_m: f64,
    },
    MinimumSpeed {
        #[serde(default = "default_minimum_speed")]
        minimum_speed_mps: f64,
        #[serde(default = "default_true")]
        move_forward_when_zero: bool,
    },
    SpeedNoise {
        #[serde(default = "default_direction_amount")]
        direction_amount: f64,
        #[serde(default)]
        speed_impact: f64,
        #[serde(default = "default_walk_rate")]
        walk_rate: f64,
    },
    Seek {
        target: Position3D,
        #[serde(default)]
        consider_velocity: bool,
    },
    TargetSpeed {
        target_speed_mps: f64,
    },
    Follow {
        target: String,
        #[serde(default = "default_follow_distance")]
        distance_m: f64,
        #[serde(default = "default_true")]
        consider_velocity: bool,
    },
    ObstacleRepulsion {
        #[serde(default = "default_repulsion_estimation_time")]
        estimation_time_s: f64,
    },
}

impl BehaviorKind {
    pub fn type_name(&self) -> &'static str {
        match self {
            BehaviorKind::Separation => "separation",
            BehaviorKind::Alignment => "alignment",
            BehaviorKind::Cohesion => "cohesion",
            BehaviorKind::MatchingVelocity => "matching_velocity",
            BehaviorKind::Pursuit { .. } => "pursuit",
            BehaviorKind::Evasion { .. } => "evasion",
            BehaviorKind::PathFollow { .. } => "path_follow",
            BehaviorKind::PathFollowPredictive { .. } => "path_follow_predictive",
            BehaviorKind::Wander { .. } => "wander",
            BehaviorKind::ObstacleAvoidance { .. } => "obstacle_avoidance",
            BehaviorKind::NeighborAvoidance { .. } => "neighbor_avoidance",
            BehaviorKind::Tether { .. } => "tether",
            BehaviorKind::MinimumSpeed { .. } => "minimum_speed",
            BehaviorKind::SpeedNoise { .. } => "speed_noise",
            BehaviorKind::Seek { .. } => "seek",
            BehaviorKind::TargetSpeed { .. } => "target_speed",
            BehaviorKind::Follow { .. } => "follow",
            BehaviorKind::ObstacleRepulsion { .. } => "obstacle_repulsion",
        }
    }
}

/// ビークル設定
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct VehicleConfig {
    pub id: String,
    pub position: Position3D,
    #[serde(default = "default_forward")]
    pub forward: Position3D,
    #[serde(default)]
    pub spawn_time_s: f64,
    #[serde(default = "default_mass")]
    pub mass: f64,
    #[serde(default = "default_vehicle_radius")]
    pub radius_m: f64,
    #[serde(default = "default_max_force")]
    pub max_force: f64,
    #[serde(default = "default_max_speed")]
    pub max_speed_mps: f64,
    #[serde(default)]
    pub initial_speed_mps: f64,
    #[serde(default = "default_arrival_radius")]
    pub arrival_radius_m: f64,
    #[serde(default = "default_true")]
    pub has_inertia: bool,
    #[serde(default = "default_true")]
    pub can_move: bool,
    #[serde(default = "default_true")]
    pub adjust_low_speed_steering: bool,
    /// 加速度平滑化の割合（time_scaledの場合は無視）
    #[serde(default = "default_acceleration_smoothing")]
    pub acceleration_smoothing_rate: f64,
    /// 平滑化の割合を時間刻みから決めるか
    #[serde(default)]
    pub acceleration_smoothing_time_scaled: bool,
    #[serde(default)]
    pub radar: RadarConfig,
    #[serde(default)]
    pub neighborhood: NeighborhoodSettings,
    #[serde(default)]
    pub behaviors: Vec<BehaviorConfig>,
}

/// シナリオ設定全体
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ScenarioConfig {
    pub meta: ScenarioMeta,
    pub sim: SimulationConfig,
    #[serde(default)]
    pub world: WorldConfig,
    #[serde(default)]
    pub pathways: Vec<PathwayConfig>,
    #[serde(default)]
    pub obstacles: Vec<ObstacleConfig>,
    #[serde(default)]
    pub vehicles: Vec<VehicleConfig>,
}

impl ScenarioConfig {
    /// YAMLファイルからシナリオ設定を読み込み
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ScenarioError> {
        let path = path.as_ref();

        // ファイル存在チェック
        if !path.exists() {
            return Err(ScenarioError::FileNotFound(path.to_path_buf()));
        }

        // ファイル読み込み
        let contents = fs::read_to_string(path).map_err(|e| ScenarioError::Io(path.to_path_buf(), e))?;

        // YAML解析
        let config: ScenarioConfig =
            serde_yaml::from_str(&contents).map_err(|e| ScenarioError::Parse(path.to_path_buf(), e))?;

        // 基本的な検証
        config.validate()?;

        Ok(config)
    }

    /// YAML文字列からシナリオ設定を読み込み
    pub fn from_yaml_str(contents: &str) -> Result<Self, ScenarioError> {
        let config: ScenarioConfig =
            serde_yaml::from_str(contents).map_err(|e| ScenarioError::Parse(PathBuf::from("<inline>"), e))?;
        config.validate()?;
        Ok(config)
    }

    /// 設定の検証
    ///
    /// 数値範囲の確認に加えて、ID重複と操舵行動の参照先（追跡対象・経路）の
    /// 存在を確認します。
    pub fn validate(&self) -> Result<(), ScenarioError> {
        // 時間設定の検証
        if !(self.sim.dt_s > 0.0) {
            return Err(validation("dt_s must be positive"));
        }
        if !(self.sim.t_max_s > 0.0) {
            return Err(validation("t_max_s must be positive"));
        }
        if self.sim.max_steps == Some(0) {
            return Err(validation("max_steps must be at least 1"));
        }

        // 世界設定の検証
        if !(self.world.cell_size_m > 0.0) {
            return Err(validation("cell_size_m must be positive"));
        }
        if self.world.wrap_radius_m.is_some_and(|radius| !(radius > 0.0)) {
            return Err(validation("wrap_radius_m must be positive"));
        }
        let mut queue_names = HashSet::new();
        for queue in &self.world.queues {
            if !queue_names.insert(queue.name.as_str()) {
                return Err(validation(format!("Duplicate queue name: {}", queue.name)));
            }
            if queue.max_processed_per_update == 0 {
                return Err(validation(format!(
                    "Queue {}: max_processed_per_update must be at least 1",
                    queue.name
                )));
            }
        }

        // 経路の検証
        let mut pathway_ids = HashSet::new();
        for pathway in &self.pathways {
            if !pathway_ids.insert(pathway.id.as_str()) {
                return Err(validation(format!("Duplicate pathway id: {}", pathway.id)));
            }
            if pathway.points.len() < 2 {
                return Err(validation(format!("Pathway {}: at least 2 points are required", pathway.id)));
            }
            if !(pathway.radius_m > 0.0) {
                return Err(validation(format!("Pathway {}: radius_m must be positive", pathway.id)));
            }
            if pathway.points.iter().any(|p| !p.is_finite()) {
                return Err(validation(format!("Pathway {}: points must be finite", pathway.id)));
            }
        }

        // 障害物とビークルは同じID空間を共有する
        let mut object_ids = HashSet::new();
        for obstacle in &self.obstacles {
            if !object_ids.insert(obstacle.id.as_str()) {
                return Err(validation(format!("Duplicate object id: {}", obstacle.id)));
            }
            if !(obstacle.radius_m > 0.0) || !obstacle.position.is_finite() {
                return Err(validation(format!("Obstacle {}: invalid position or radius", obstacle.id)));
            }
        }
        for vehicle in &self.vehicles {
            if !object_ids.insert(vehicle.id.as_str()) {
                return Err(validation(format!("Duplicate object id: {}", vehicle.id)));
            }
        }

        for vehicle in &self.vehicles {
            self.validate_vehicle(vehicle, &object_ids, &pathway_ids)?;
        }

        Ok(())
    }

    fn validate_vehicle(
        &self,
        vehicle: &VehicleConfig,
        object_ids: &HashSet<&str>,
        pathway_ids: &HashSet<&str>,
    ) -> Result<(), ScenarioError> {
        let id = &vehicle.id;
        if !vehicle.position.is_finite() {
            return Err(validation(format!("Vehicle {}: position must be finite", id)));
        }
        if !vehicle.forward.is_finite() || vehicle.forward.to_vec().length_squared() == 0.0 {
            return Err(validation(format!("Vehicle {}: forward must be a non-zero vector", id)));
        }
        if vehicle.spawn_time_s < 0.0 || vehicle.spawn_time_s >= self.sim.t_max_s {
            return Err(validation(format!("Vehicle {}: spawn_time_s must be within [0, t_max_s)", id)));
        }
        if !(vehicle.mass > 0.0) {
            return Err(validation(format!("Vehicle {}: mass must be positive", id)));
        }
        if !(vehicle.radius_m > 0.0) {
            return Err(validation(format!("Vehicle {}: radius_m must be positive", id)));
        }
        if !(vehicle.max_force >= 0.0) || !(vehicle.max_speed_mps >= 0.0) {
            return Err(validation(format!("Vehicle {}: max_force and max_speed_mps must be non-negative", id)));
        }
        if !(vehicle.initial_speed_mps >= 0.0) || !(vehicle.arrival_radius_m >= 0.0) {
            return Err(validation(format!(
                "Vehicle {}: initial_speed_mps and arrival_radius_m must be non-negative",
                id
            )));
        }
        if !(0.0..=1.0).contains(&vehicle.acceleration_smoothing_rate) {
            return Err(validation(format!("Vehicle {}: acceleration_smoothing_rate must be in [0, 1]", id)));
        }

        let radar = &vehicle.radar;
        if !(radar.detection_radius_m > 0.0) || !(radar.tick_length_s > 0.0) {
            return Err(validation(format!(
                "Vehicle {}: radar detection_radius_m and tick_length_s must be positive",
                id
            )));
        }

        let neighborhood = &vehicle.neighborhood;
        if !(neighborhood.min_radius_m >= 0.0) || !(neighborhood.max_radius_m >= neighborhood.min_radius_m) {
            return Err(validation(format!("Vehicle {}: neighborhood requires 0 <= min_radius_m <= max_radius_m", id)));
        }

        for behavior in &vehicle.behaviors {
            let name = behavior.kind.type_name();
            if !behavior.weight.is_finite() || behavior.weight < 0.0 {
                return Err(validation(format!("Vehicle {}: {} weight must be non-negative", id, name)));
            }
            match &behavior.kind {
                BehaviorKind::Pursuit { quarry, .. } => {
                    if quarry == id {
                        return Err(validation(format!("Vehicle {}: cannot pursue itself", id)));
                    }
                    if !object_ids.contains(quarry.as_str()) {
                        return Err(validation(format!("Vehicle {}: unknown quarry {}", id, quarry)));
                    }
                }
                BehaviorKind::Follow { target, .. } => {
                    if target == id {
                        return Err(validation(format!("Vehicle {}: cannot follow itself", id)));
                    }
                    if !object_ids.contains(target.as_str()) {
                        return Err(validation(format!("Vehicle {}: unknown follow target {}", id, target)));
                    }
                }
                BehaviorKind::Evasion { menaces, .. } => {
                    if let Some(unknown) = menaces.iter().find(|m| !object_ids.contains(m.as_str())) {
                        return Err(validation(format!("Vehicle {}: unknown menace {}", id, unknown)));
                    }
                }
                BehaviorKind::PathFollow { pathway, .. } | BehaviorKind::PathFollowPredictive { pathway, .. } => {
                    if !pathway_ids.contains(pathway.as_str()) {
                        return Err(validation(format!("Vehicle {}: unknown pathway {}", id, pathway)));
                    }
                }
                BehaviorKind::NeighborAvoidance { avoid_angle_cos, .. } => {
                    if !(-1.0..=1.0).contains(avoid_angle_cos) {
                        return Err(validation(format!("Vehicle {}: avoid_angle_cos must be in [-1, 1]", id)));
                    }
                }
                BehaviorKind::Tether { position, .. } | BehaviorKind::Seek { target: position, .. } => {
                    if !position.is_finite() {
                        return Err(validation(format!("Vehicle {}: {} position must be finite", id, name)));
                    }
                }
                _ => {}
            }
        }
        Ok(())
    }

    /// シナリオ概要を表示
    pub fn print_summary(&self) {
        println!("=== シナリオ情報 ===");
        println!("名前: {}", self.meta.name);
        println!("説明: {}", self.meta.description);
        println!("バージョン: {}", self.meta.version);
        println!();

        println!("=== シミュレーション設定 ===");
        println!("時間刻み: {:.3}秒", self.sim.dt_s);
        println!("最大時間: {:.1}秒 ({:.1}分)", self.sim.t_max_s, self.sim.t_max_s / 60.0);
        println!("シード値: {}", self.sim.seed);
        if let Some(max_steps) = self.sim.max_steps {
            println!("最大ステップ数: {}", max_steps);
        }
        println!();

        println!("=== 世界 ===");
        println!("セルサイズ: {:.1}m", self.world.cell_size_m);
        if let Some(radius) = self.world.wrap_radius_m {
            println!("折り返し半径: {:.1}m", radius);
        }
        for queue in &self.world.queues {
            println!("  キュー {}: 最大{}件/更新", queue.name, queue.max_processed_per_update);
        }
        println!("経路: {}本", self.pathways.len());
        println!("障害物: {}個", self.obstacles.len());
        println!();

        println!("=== ビークル ===");
        println!("ビークル数: {}", self.vehicles.len());
        for vehicle in &self.vehicles {
            let behaviors: Vec<&str> = vehicle.behaviors.iter().map(|b| b.kind.type_name()).collect();
            println!(
                "  {}: 最大速度 {:.1}m/s (出現時刻: {:.1}秒) [{}]",
                vehicle.id,
                vehicle.max_speed_mps,
                vehicle.spawn_time_s,
                behaviors.join(", ")
            );
        }
    }
}

fn validation(message: impl Into<String>) -> ScenarioError {
    ScenarioError::Validation(message.into())
}

fn default_true() -> bool {
    true
}
fn default_cell_size() -> f64 {
    crate::models::spatial_index::DEFAULT_CELL_SIZE
}
fn default_detection_radius() -> f64 {
    crate::models::radar::DEFAULT_DETECTION_RADIUS
}
fn default_tick_length() -> f64 {
    crate::models::radar::DEFAULT_TICK_LENGTH
}
fn default_queue_name() -> String {
    crate::models::radar::DEFAULT_QUEUE_NAME.to_string()
}
fn default_neighborhood_min() -> f64 {
    3.0
}
fn default_neighborhood_max() -> f64 {
    7.5
}
fn default_neighborhood_angle() -> f64 {
    135.0
}
fn default_weight() -> f64 {
    1.0
}
fn default_max_prediction_time() -> f64 {
    5.0
}
fn default_safety_distance() -> f64 {
    2.0
}
fn default_evasion_prediction_time() -> f64 {
    1.0
}
fn default_path_prediction_time() -> f64 {
    1.5
}
fn default_min_speed_to_consider() -> f64 {
    0.25
}
fn default_predictive_prediction_time() -> f64 {
    2.0
}
fn default_wander_latitude() -> f64 {
    2.0
}
fn default_wander_smooth_rate() -> f64 {
    0.05
}
fn default_min_time_to_collision() -> f64 {
    2.0
}
fn default_avoidance_force_factor() -> f64 {
    0.75
}
fn default_avoid_angle_cos() -> f64 {
    0.707
}
fn default_tether_distance() -> f64 {
    30.0
}
fn default_minimum_speed() -> f64 {
    4.0
}
fn default_direction_amount() -> f64 {
    0.2
}
fn default_follow_distance() -> f64 {
    2.0
}
fn default_repulsion_estimation_time() -> f64 {
    2.0
}
fn default_walk_rate() -> f64 {
    1.0
}
fn default_forward() -> Position3D {
    Position3D { x_m: 0.0, y_m: 0.0, z_m: 1.0 }
}
fn default_mass() -> f64 {
    1.0
}
fn default_vehicle_radius() -> f64 {
    0.5
}
fn default_max_force() -> f64 {
    0.1
}
fn default_max_speed() -> f64 {
    1.0
}
fn default_arrival_radius() -> f64 {
    0.25
}
fn default_acceleration_smoothing() -> f64 {
    0.4
}

/// シナリオ読み込みエラー
#[derive(Debug, Error)]
pub enum ScenarioError {
    #[error("シナリオファイルが見つかりません: {}", .0.display())]
    FileNotFound(PathBuf),
    #[error("ファイル読み込みエラー {}: {}", .0.display(), .1)]
    Io(PathBuf, #[source] std::io::Error),
    #[error("YAML解析エラー {}: {}", .0.display(), .1)]
    Parse(PathBuf, #[source] serde_yaml::Error),
    #[error("設定検証エラー: {0}")]
    Validation(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    const SCENARIO: &str = r#"
meta:
  version: "1.0"
  name: "chase"
  description: "wolf chases rabbit along a path"
sim:
  dt_s: 0.1
  t_max_s: 10.0
  seed: 7
world:
  cell_size_m: 8.0
  queues:
    - name: Radar
      max_processed_per_update: 4
pathways:
  - id: trail
    kind: spline
    radius_m: 2.0
    points:
      - { x_m: 0.0, y_m: 0.0, z_m: 0.0 }
      - { x_m: 20.0, y_m: 0.0, z_m: 0.0 }
      - { x_m: 20.0, y_m: 0.0, z_m: 20.0 }
obstacles:
  - id: rock
    position: { x_m: 5.0, y_m: 0.0, z_m: 5.0 }
    radius_m: 1.5
vehicles:
  - id: rabbit
    position: { x_m: 0.0, y_m: 0.0, z_m: 0.0 }
    max_speed_mps: 3.0
    behaviors:
      - type: path_follow
        pathway: trail
      - type: evasion
        menaces: [wolf]
        weight: 2.0
  - id: wolf
    position: { x_m: -5.0, y_m: 0.0, z_m: 0.0 }
    forward: { x_m: 1.0, y_m: 0.0, z_m: 0.0 }
    spawn_time_s: 1.0
    max_speed_mps: 4.0
    radar:
      detection_radius_m: 10.0
      tick_length_s: 0.2
    behaviors:
      - type: pursuit
        quarry: rabbit
        slowing_distance_m: 2.0
      - type: obstacle_avoidance
      - type: separation
        weight: 0.5
"#;

    #[test]
    fn test_parse_scenario() {
        let config = ScenarioConfig::from_yaml_str(SCENARIO).unwrap();
        assert_eq!(config.meta.name, "chase");
        assert_eq!(config.sim.seed, 7);
        assert_eq!(config.sim.max_steps, None);
        assert_eq!(config.world.queues[0].max_processed_per_update, 4);
        assert_eq!(config.pathways[0].kind, PathwayKind::Spline);
        assert_eq!(config.vehicles.len(), 2);

        let rabbit = &config.vehicles[0];
        assert_eq!(rabbit.mass, 1.0);
        assert_eq!(rabbit.radius_m, 0.5);
        assert_eq!(rabbit.forward.to_vec(), DVec3::Z);
        assert!(rabbit.radar.enabled);
        assert_eq!(rabbit.radar.queue, "Radar");
        assert_eq!(rabbit.behaviors[1].weight, 2.0);
        assert_eq!(rabbit.behaviors[0].weight, 1.0);

        let wolf = &config.vehicles[1];
        assert_eq!(wolf.radar.detection_radius_m, 10.0);
        match &wolf.behaviors[0].kind {
            BehaviorKind::Pursuit {
                quarry,
                max_prediction_time_s,
                slowing_distance_m,
                ..
            } => {
                assert_eq!(quarry, "rabbit");
                assert_eq!(*max_prediction_time_s, 5.0);
                assert_eq!(*slowing_distance_m, Some(2.0));
            }
            other => panic!("unexpected behavior: {:?}", other),
        }
        assert_eq!(wolf.behaviors[2].kind.type_name(), "separation");
        assert_eq!(wolf.behaviors[2].weight, 0.5);
    }

    #[test]
    fn test_unknown_quarry_is_rejected() {
        let yaml = SCENARIO.replace("quarry: rabbit", "quarry: fox");
        assert!(matches!(
            ScenarioConfig::from_yaml_str(&yaml),
            Err(ScenarioError::Validation(_))
        ));
    }

    #[test]
    fn test_follow_and_repulsion_are_parsed() {
        let yaml = SCENARIO.replace(
            "      - type: separation\n        weight: 0.5\n",
            "      - type: follow\n        target: rabbit\n        distance_m: 3.0\n      - type: obstacle_repulsion\n",
        );
        let config = ScenarioConfig::from_yaml_str(&yaml).unwrap();
        let wolf = &config.vehicles[1];
        match &wolf.behaviors[2].kind {
            BehaviorKind::Follow {
                target,
                distance_m,
                consider_velocity,
            } => {
                assert_eq!(target, "rabbit");
                assert_eq!(*distance_m, 3.0);
                assert!(*consider_velocity);
            }
            other => panic!("unexpected behavior {:?}", other),
        }
        assert_eq!(wolf.behaviors[3].kind.type_name(), "obstacle_repulsion");

        let unknown = yaml.replace("target: rabbit", "target: fox");
        assert!(matches!(
            ScenarioConfig::from_yaml_str(&unknown),
            Err(ScenarioError::Validation(_))
        ));
    }

    #[test]
    fn test_wrap_radius_must_be_positive() {
        let config = ScenarioConfig::from_yaml_str(&SCENARIO.replace("cell_size_m: 8.0", "cell_size_m: 8.0\n  wrap_radius_m: 50.0")).unwrap();
        assert_eq!(config.world.wrap_radius_m, Some(50.0));
        let yaml = SCENARIO.replace("cell_size_m: 8.0", "cell_size_m: 8.0\n  wrap_radius_m: -1.0");
        assert!(matches!(
            ScenarioConfig::from_yaml_str(&yaml),
            Err(ScenarioError::Validation(_))
        ));
    }

    #[test]
    fn test_unknown_pathway_is_rejected() {
        let yaml = SCENARIO.replace("pathway: trail", "pathway: river");
        assert!(matches!(
            ScenarioConfig::from_yaml_str(&yaml),
            Err(ScenarioError::Validation(_))
        ));
    }

    #[test]
    fn test_duplicate_ids_are_rejected() {
        let yaml = SCENARIO.replace("id: rock", "id: wolf");
        assert!(matches!(
            ScenarioConfig::from_yaml_str(&yaml),
            Err(ScenarioError::Validation(_))
        ));
    }

    #[test]
    fn test_invalid_time_step_is_rejected() {
        let yaml = SCENARIO.replace("dt_s: 0.1", "dt_s: 0.0");
        assert!(matches!(
            ScenarioConfig::from_yaml_str(&yaml),
            Err(ScenarioError::Validation(_))
        ));
    }

    #[test]
    fn test_single_point_pathway_is_rejected() {
        let yaml = SCENARIO.replace(
            "      - { x_m: 20.0, y_m: 0.0, z_m: 0.0 }\n      - { x_m: 20.0, y_m: 0.0, z_m: 20.0 }\n",
            "",
        );
        assert!(matches!(
            ScenarioConfig::from_yaml_str(&yaml),
            Err(ScenarioError::Validation(_))
        ));
    }

    #[test]
    fn test_unknown_behavior_type_fails_to_parse() {
        let yaml = SCENARIO.replace("type: separation", "type: teleport");
        assert!(matches!(
            ScenarioConfig::from_yaml_str(&yaml),
            Err(ScenarioError::Parse(_, _))
        ));
    }

    #[test]
    fn test_missing_file() {
        let result = ScenarioConfig::from_file("does/not/exist.yaml");
        assert!(matches!(result, Err(ScenarioError::FileNotFound(_))));
    }
}
