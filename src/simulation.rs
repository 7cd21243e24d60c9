//! # Simulation モジュール
//!
//! 操舵シミュレーションの中核となるシミュレーションエンジンを提供します。
//!
//! このモジュールは、固定時間刻みのメインループを管理し、すべてのビークルの
//! レーダー走査・操舵力計算・運動積分を協調させます。力の計算は空間インデックスに
//! 保存された前ステップ終了時点のスナップショットのみを参照するため、
//! ビークルの処理順序は結果に影響しません。
//!
//! ## シミュレーション処理順序
//!
//! 各時間刻みにおいて、以下の順序で処理が実行されます：
//!
//! 1. **出現処理**: 出現時刻に達した待機中ビークルをアクティブ化
//! 2. **レーダー処理**: ティックキューから期限の来たレーダーを走査し近傍を更新
//! 3. **操舵処理**: スナップショットに対して操舵力を計算し、後処理付きで積分
//! 4. **インデックス更新**: 全ビークルの新しい状態をインデックスへ反映
//! 5. **時刻更新**
//!
//! 最初のステップの前にウォームアップとして全アクティブビークルのレーダーを
//! キュー上限に関係なく一度ずつ走査します。
//!
//! ## 使用例
//!
//! ```rust,no_run
//! use steersim::scenario::ScenarioConfig;
//! use steersim::simulation::SimulationEngine;
//!
//! let config = ScenarioConfig::from_file("scenarios/flocking.yaml")?;
//! let mut engine = SimulationEngine::from_scenario(&config, 1)?;
//! let summary = engine.run();
//! summary.print();
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;

use glam::DVec3;
use rand::SeedableRng;
use rand::rngs::StdRng;
use thiserror::Error;
use tracing::{debug, info, trace, warn};

use crate::models::{
    AccelerationSmoothing, AgentStatus, DetectableId, DetectableObject, EPSILON, Evasion, Follow, IAgent, IMovable,
    MinimumSpeed, NeighborAvoidance, NeighborhoodConfig, ObstacleAvoidance, ObstacleRepulsion, PathFollower, Pathway,
    PathwayError, PredictivePathFollower, Pursuit, QueueStats, Radar, Seek, SpatialIndex, SpeedNoise, SphericalObstacle,
    Steering, SteeringBehavior, SteeringContext, SteeringSet, TargetSpeed, Tether, TickQueues, Vehicle, Wander,
    math_utils, neighborhood::refresh_neighbors,
};
use crate::scenario::{BehaviorConfig, BehaviorKind, ScenarioConfig, ScenarioError, VehicleConfig};

/// 進行状況をログ出力するステップ間隔
const PROGRESS_LOG_INTERVAL: u64 = 100;

/// ビークルごとの乱数シードを分散させる係数
const SEED_SPREAD: u64 = 0x9E37_79B9_7F4A_7C15;

/// シミュレーションエラー
#[derive(Debug, Error)]
pub enum SimulationError {
    #[error(transparent)]
    Scenario(#[from] ScenarioError),
    #[error("経路の構築に失敗しました ({name}): {source}")]
    Pathway {
        name: String,
        #[source]
        source: PathwayError,
    },
    #[error("IDが重複しています: {0}")]
    DuplicateId(String),
    #[error("{owner}の参照先が見つかりません: {target}")]
    UnknownReference { owner: String, target: String },
}

/// シミュレーションの段階
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SimulationPhase {
    /// 初回のレーダー走査待ち
    Warmup,
    /// 実行中
    Running,
    /// 終了
    Finished,
}

/// ビークルとその付属コンポーネント
#[derive(Debug, Clone)]
pub struct Agent {
    pub vehicle: Vehicle,
    pub radar: Option<Radar>,
    pub neighborhood: NeighborhoodConfig,
    pub steerings: SteeringSet,
    neighbors: Vec<DetectableId>,
    rng: StdRng,
}

impl Agent {
    /// レーダーなし・操舵なしのエージェントを作成
    ///
    /// 乱数生成器はエンジンへの追加時にシードから再生成されます。
    pub fn new(vehicle: Vehicle) -> Self {
        Self {
            vehicle,
            radar: None,
            neighborhood: NeighborhoodConfig::default(),
            steerings: SteeringSet::new(),
            neighbors: Vec::new(),
            rng: StdRng::seed_from_u64(0),
        }
    }

    /// レーダーを付与
    pub fn with_radar(mut self, radar: Radar) -> Self {
        self.radar = Some(radar);
        self
    }

    pub fn with_neighborhood(mut self, neighborhood: NeighborhoodConfig) -> Self {
        self.neighborhood = neighborhood;
        self
    }

    pub fn with_steering(mut self, behavior: SteeringBehavior, weight: f64) -> Self {
        self.steerings.push(Steering::new(behavior, weight));
        self
    }

    pub fn id(&self) -> DetectableId {
        self.vehicle.get_id()
    }

    /// 直近のレーダー走査で求めた近傍
    pub fn neighbors(&self) -> &[DetectableId] {
        &self.neighbors
    }
}

/// ビークルごとの実行結果
#[derive(Debug, Clone, PartialEq)]
pub struct VehicleSummary {
    pub id: DetectableId,
    pub name: String,
    pub status: AgentStatus,
    pub position: DVec3,
    pub speed: f64,
    pub distance_traveled: f64,
    pub radar_ticks: u64,
}

/// シミュレーション結果の概要
#[derive(Debug, Clone, PartialEq)]
pub struct SimulationSummary {
    pub steps: u64,
    pub elapsed_time: f64,
    pub vehicles: Vec<VehicleSummary>,
    pub queues: Vec<(String, QueueStats)>,
}

impl SimulationSummary {
    /// 結果を表示
    pub fn print(&self) {
        println!("=== シミュレーション結果 ===");
        println!("実行時間: {:.2}秒", self.elapsed_time);
        println!("総ステップ数: {}", self.steps);
        println!();

        println!("=== ビークル ===");
        for vehicle in &self.vehicles {
            println!(
                "  {} ({}): {:?} 位置({:.2}, {:.2}, {:.2}) 速度 {:.2}m/s 走行距離 {:.2}m レーダー {}回",
                vehicle.name,
                vehicle.id,
                vehicle.status,
                vehicle.position.x,
                vehicle.position.y,
                vehicle.position.z,
                vehicle.speed,
                vehicle.distance_traveled,
                vehicle.radar_ticks
            );
        }
        println!();

        println!("=== ティックキュー ===");
        for (name, stats) in &self.queues {
            println!(
                "  {}: 処理 {}件 / 更新 {}回 (最大バックログ {}件)",
                name, stats.processed_total, stats.updates, stats.max_backlog
            );
        }
    }
}

pub struct SimulationEngine {
    pub current_time: f64,
    pub dt: f64,
    pub max_time: f64,
    pub max_steps: Option<u64>,
    pub seed: u64,
    pub step_count: u64,
    pub verbose_level: u8,
    /// 原点中心の折り返し半径（`None`なら折り返さない）
    pub wrap_radius: Option<f64>,

    phase: SimulationPhase,
    index: SpatialIndex,
    agents: BTreeMap<DetectableId, Agent>,
    obstacles: BTreeMap<DetectableId, SphericalObstacle>,
    pathways: HashMap<String, Arc<Pathway>>,
    queues: TickQueues,
    names: HashMap<String, DetectableId>,
    next_id: u32,
}

impl SimulationEngine {
    /// 空のエンジンを作成
    ///
    /// # 引数
    ///
    /// * `dt` - 時間刻み（秒）
    /// * `max_time` - 最大シミュレーション時間（秒）
    /// * `seed` - 乱数シード
    pub fn new(dt: f64, max_time: f64, seed: u64) -> Self {
        Self {
            current_time: 0.0,
            dt,
            max_time,
            max_steps: None,
            seed,
            step_count: 0,
            verbose_level: 0,
            wrap_radius: None,
            phase: SimulationPhase::Warmup,
            index: SpatialIndex::default(),
            agents: BTreeMap::new(),
            obstacles: BTreeMap::new(),
            pathways: HashMap::new(),
            queues: TickQueues::new(),
            names: HashMap::new(),
            next_id: 1,
        }
    }

    /// シナリオからエンジンを構築
    ///
    /// 経路・障害物・ビークルの順に生成し、操舵行動の参照先を名前からIDへ解決します。
    pub fn from_scenario(scenario: &ScenarioConfig, verbose_level: u8) -> Result<Self, SimulationError> {
        scenario.validate()?;

        let mut engine = Self::new(scenario.sim.dt_s, scenario.sim.t_max_s, scenario.sim.seed);
        engine.max_steps = scenario.sim.max_steps;
        engine.verbose_level = verbose_level;
        engine.wrap_radius = scenario.world.wrap_radius_m;
        engine.index = SpatialIndex::new(scenario.world.cell_size_m);

        if verbose_level > 0 {
            info!("シミュレーションエンジンを初期化中...");
        }

        for queue in &scenario.world.queues {
            engine.queues.define(&queue.name, queue.max_processed_per_update);
        }
        engine.initialize_pathways(scenario)?;
        engine.initialize_obstacles(scenario)?;
        engine.initialize_vehicles(scenario)?;

        if verbose_level > 0 {
            info!("初期化完了:");
            info!("  経路: {}本", engine.pathways.len());
            info!("  障害物: {}個", engine.obstacles.len());
            info!("  ビークル: {}台", engine.agents.len());
        }

        Ok(engine)
    }

    fn initialize_pathways(&mut self, scenario: &ScenarioConfig) -> Result<(), SimulationError> {
        for config in &scenario.pathways {
            let points: Vec<DVec3> = config.points.iter().map(|p| p.to_vec()).collect();
            let pathway = Pathway::new(config.kind, &points, config.radius_m).map_err(|source| {
                SimulationError::Pathway {
                    name: config.id.clone(),
                    source,
                }
            })?;
            self.add_pathway(&config.id, pathway);

            if self.verbose_level > 1 {
                debug!("経路初期化: {} ({:?}, {}点)", config.id, config.kind, points.len());
            }
        }
        Ok(())
    }

    fn initialize_obstacles(&mut self, scenario: &ScenarioConfig) -> Result<(), SimulationError> {
        for config in &scenario.obstacles {
            let id = self.allocate_id();
            let obstacle = SphericalObstacle::new(id, config.id.clone(), config.position.to_vec(), config.radius_m);
            self.add_obstacle(obstacle)?;

            if self.verbose_level > 1 {
                debug!("障害物初期化: {} (半径: {:.1}m)", config.id, config.radius_m);
            }
        }
        Ok(())
    }

    fn initialize_vehicles(&mut self, scenario: &ScenarioConfig) -> Result<(), SimulationError> {
        // 先に全ビークルのIDを確定させ、相互参照を解決できるようにする
        let ids: Vec<DetectableId> = scenario.vehicles.iter().map(|_| self.allocate_id()).collect();
        let mut resolved = self.names.clone();
        for (config, id) in scenario.vehicles.iter().zip(&ids) {
            if resolved.insert(config.id.clone(), *id).is_some() {
                return Err(SimulationError::DuplicateId(config.id.clone()));
            }
        }

        for (config, id) in scenario.vehicles.iter().zip(ids) {
            let agent = self.build_agent(config, id, &resolved)?;
            self.add_vehicle(agent)?;

            if self.verbose_level > 1 {
                debug!(
                    "ビークル初期化: {} ({}, 操舵: {}件, 出現時刻: {:.1}秒)",
                    config.id,
                    id,
                    config.behaviors.len(),
                    config.spawn_time_s
                );
            }
        }
        Ok(())
    }

    fn build_agent(
        &self,
        config: &VehicleConfig,
        id: DetectableId,
        names: &HashMap<String, DetectableId>,
    ) -> Result<Agent, SimulationError> {
        let mut vehicle = Vehicle::new(id, config.id.clone(), config.position.to_vec(), config.forward.to_vec());
        vehicle.spawn_time = config.spawn_time_s;
        vehicle.set_mass(config.mass);
        vehicle.set_radius(config.radius_m);
        vehicle.set_max_force(config.max_force);
        vehicle.set_max_speed(config.max_speed_mps);
        vehicle.set_speed(config.initial_speed_mps);
        vehicle.set_arrival_radius(config.arrival_radius_m);
        vehicle.has_inertia = config.has_inertia;
        vehicle.can_move = config.can_move;
        vehicle.adjust_low_speed_steering = config.adjust_low_speed_steering;
        vehicle.acceleration_smoothing = if config.acceleration_smoothing_time_scaled {
            AccelerationSmoothing::TimeScaled
        } else {
            AccelerationSmoothing::Fixed(config.acceleration_smoothing_rate)
        };

        let neighborhood = NeighborhoodConfig::new(
            config.neighborhood.min_radius_m,
            config.neighborhood.max_radius_m,
            config.neighborhood.angle_deg,
        );
        let mut agent = Agent::new(vehicle).with_neighborhood(neighborhood);

        if config.radar.enabled {
            let mut radar = Radar::new(id);
            radar.set_detection_radius(config.radar.detection_radius_m);
            radar.set_tick_length(config.radar.tick_length_s);
            radar.queue_name = config.radar.queue.clone();
            radar.detect_disabled_vehicles = config.radar.detect_disabled_vehicles;
            agent = agent.with_radar(radar);
        }

        for behavior in &config.behaviors {
            let steering = self.build_behavior(&config.id, behavior, names)?;
            agent = agent.with_steering(steering, behavior.weight);
        }
        Ok(agent)
    }

    fn build_behavior(
        &self,
        owner: &str,
        config: &BehaviorConfig,
        names: &HashMap<String, DetectableId>,
    ) -> Result<SteeringBehavior, SimulationError> {
        let resolve = |target: &str| {
            names.get(target).copied().ok_or_else(|| SimulationError::UnknownReference {
                owner: owner.to_string(),
                target: target.to_string(),
            })
        };
        let pathway = |name: &str| {
            self.pathways.get(name).cloned().ok_or_else(|| SimulationError::UnknownReference {
                owner: owner.to_string(),
                target: name.to_string(),
            })
        };

        let behavior = match &config.kind {
            BehaviorKind::Separation => SteeringBehavior::Separation,
            BehaviorKind::Alignment => SteeringBehavior::Alignment,
            BehaviorKind::Cohesion => SteeringBehavior::Cohesion,
            BehaviorKind::MatchingVelocity => SteeringBehavior::MatchingVelocity,
            BehaviorKind::Pursuit {
                quarry,
                acceptable_distance_m,
                max_prediction_time_s,
                slowing_distance_m,
            } => {
                let mut pursuit = Pursuit::new(resolve(quarry.as_str())?);
                pursuit.acceptable_distance = *acceptable_distance_m;
                pursuit.max_prediction_time = *max_prediction_time_s;
                pursuit.slowing_distance = *slowing_distance_m;
                SteeringBehavior::Pursuit(pursuit)
            }
            BehaviorKind::Evasion {
                menaces,
                safety_distance_m,
                prediction_time_s,
            } => {
                let ids = menaces.iter().map(|m| resolve(m.as_str())).collect::<Result<Vec<_>, _>>()?;
                let mut evasion = Evasion::new(ids);
                evasion.safety_distance = *safety_distance_m;
                evasion.prediction_time = *prediction_time_s;
                SteeringBehavior::Evasion(evasion)
            }
            BehaviorKind::PathFollow {
                pathway: name,
                prediction_time_s,
                min_speed_mps,
            } => {
                let mut follower = PathFollower::new(pathway(name.as_str())?, name.clone());
                follower.prediction_time = *prediction_time_s;
                follower.min_speed_to_consider = *min_speed_mps;
                SteeringBehavior::PathFollow(follower)
            }
            BehaviorKind::PathFollowPredictive {
                pathway: name,
                direction,
                prediction_time_s,
            } => {
                let mut follower = PredictivePathFollower::new(pathway(name.as_str())?, name.clone());
                follower.direction = *direction;
                follower.prediction_time = *prediction_time_s;
                SteeringBehavior::PathFollowPredictive(follower)
            }
            BehaviorKind::Wander {
                max_latitude_side,
                max_latitude_up,
                smooth_rate,
            } => {
                let mut wander = Wander::default();
                wander.max_latitude_side = *max_latitude_side;
                wander.max_latitude_up = *max_latitude_up;
                wander.smooth_rate = *smooth_rate;
                SteeringBehavior::Wander(wander)
            }
            BehaviorKind::ObstacleAvoidance {
                min_time_to_collision_s,
                avoidance_force_factor,
            } => SteeringBehavior::ObstacleAvoidance(ObstacleAvoidance {
                min_time_to_collision: *min_time_to_collision_s,
                avoidance_force_factor: *avoidance_force_factor,
            }),
            BehaviorKind::NeighborAvoidance {
                avoid_angle_cos,
                min_time_to_collision_s,
            } => SteeringBehavior::NeighborAvoidance(NeighborAvoidance {
                avoid_angle_cos: *avoid_angle_cos,
                min_time_to_collision: *min_time_to_collision_s,
            }),
            BehaviorKind::Tether {
                position,
                maximum_distance_m,
            } => {
                let mut tether = Tether::new(position.to_vec());
                tether.maximum_distance = *maximum_distance_m;
                SteeringBehavior::Tether(tether)
            }
            BehaviorKind::MinimumSpeed {
                minimum_speed_mps,
                move_forward_when_zero,
            } => SteeringBehavior::MinimumSpeed(MinimumSpeed {
                minimum_speed: *minimum_speed_mps,
                move_forward_when_zero: *move_forward_when_zero,
            }),
            BehaviorKind::SpeedNoise {
                direction_amount,
                speed_impact,
                walk_rate,
            } => {
                let mut noise = SpeedNoise::default();
                noise.direction_amount = *direction_amount;
                noise.speed_impact = *speed_impact;
                noise.walk_rate = *walk_rate;
                SteeringBehavior::SpeedNoise(noise)
            }
            BehaviorKind::Seek {
                target,
                consider_velocity,
            } => SteeringBehavior::Seek(Seek {
                target: target.to_vec(),
                consider_velocity: *consider_velocity,
            }),
            BehaviorKind::TargetSpeed { target_speed_mps } => SteeringBehavior::TargetSpeed(TargetSpeed {
                target_speed: *target_speed_mps,
            }),
            BehaviorKind::Follow {
                target,
                distance_m,
                consider_velocity,
            } => {
                let mut follow = Follow::new(resolve(target.as_str())?);
                follow.distance = *distance_m;
                follow.consider_velocity = *consider_velocity;
                SteeringBehavior::Follow(follow)
            }
            BehaviorKind::ObstacleRepulsion { estimation_time_s } => {
                SteeringBehavior::ObstacleRepulsion(ObstacleRepulsion {
                    estimation_time: *estimation_time_s,
                })
            }
        };
        Ok(behavior)
    }

    // --- 状態参照 ---

    pub fn phase(&self) -> SimulationPhase {
        self.phase
    }

    pub fn index(&self) -> &SpatialIndex {
        &self.index
    }

    pub fn queues(&self) -> &TickQueues {
        &self.queues
    }

    pub fn agent(&self, id: DetectableId) -> Option<&Agent> {
        self.agents.get(&id)
    }

    pub fn agent_mut(&mut self, id: DetectableId) -> Option<&mut Agent> {
        self.agents.get_mut(&id)
    }

    pub fn agents(&self) -> impl Iterator<Item = &Agent> {
        self.agents.values()
    }

    pub fn obstacle(&self, id: DetectableId) -> Option<&SphericalObstacle> {
        self.obstacles.get(&id)
    }

    pub fn pathway(&self, name: &str) -> Option<Arc<Pathway>> {
        self.pathways.get(name).cloned()
    }

    /// 名前からIDを引く
    pub fn id_of(&self, name: &str) -> Option<DetectableId> {
        self.names.get(name).copied()
    }

    // --- ライフサイクル ---

    /// 未使用のIDを払い出す
    pub fn allocate_id(&mut self) -> DetectableId {
        while self.is_id_taken(DetectableId(self.next_id)) {
            self.next_id += 1;
        }
        let id = DetectableId(self.next_id);
        self.next_id += 1;
        id
    }

    fn is_id_taken(&self, id: DetectableId) -> bool {
        self.agents.contains_key(&id) || self.obstacles.contains_key(&id)
    }

    /// ビークルを追加（待機状態）
    ///
    /// 出現時刻に達した次のステップでアクティブ化されます。
    pub fn add_vehicle(&mut self, mut agent: Agent) -> Result<DetectableId, SimulationError> {
        let id = agent.id();
        if self.is_id_taken(id) || self.names.contains_key(&agent.vehicle.name) {
            return Err(SimulationError::DuplicateId(agent.vehicle.name.clone()));
        }
        agent.vehicle.status = AgentStatus::Pending;
        agent.rng = StdRng::seed_from_u64(self.seed ^ u64::from(id.0).wrapping_mul(SEED_SPREAD));
        self.names.insert(agent.vehicle.name.clone(), id);
        self.agents.insert(id, agent);
        Ok(id)
    }

    /// ビークルをアクティブ化し、インデックスとレーダーキューに登録
    pub fn activate(&mut self, id: DetectableId) -> bool {
        let Some(agent) = self.agents.get_mut(&id) else {
            return false;
        };
        if !matches!(agent.vehicle.status, AgentStatus::Pending | AgentStatus::Inactive) {
            return false;
        }
        agent.vehicle.status = AgentStatus::Active;
        self.index.register(DetectableObject::from_vehicle_state(&agent.vehicle.state()));
        if let Some(radar) = &agent.radar {
            // ウォームアップで走査されるビークルは次の周期から
            let first_tick = if self.phase == SimulationPhase::Warmup {
                self.current_time + radar.tick_length
            } else {
                self.current_time
            };
            self.queues
                .queue_mut(&radar.queue_name)
                .add(id, radar.tick_length, first_tick);
        }
        info!("ビークル{}({})がアクティブ化 (t={:.2}s)", agent.vehicle.name, id, self.current_time);
        true
    }

    /// ビークルを非アクティブ化し、インデックスとキューから外す
    pub fn deactivate(&mut self, id: DetectableId) -> bool {
        let Some(agent) = self.agents.get_mut(&id) else {
            return false;
        };
        if agent.vehicle.status != AgentStatus::Active {
            return false;
        }
        agent.vehicle.status = AgentStatus::Inactive;
        agent.neighbors.clear();
        if let Some(radar) = agent.radar.as_mut() {
            radar.clear();
        }
        self.index.deregister(id);
        self.queues.remove_everywhere(id);
        info!("ビークル{}({})が非アクティブ化 (t={:.2}s)", agent.vehicle.name, id, self.current_time);
        true
    }

    /// ビークルを破棄
    ///
    /// 他のビークルの近傍リストやレーダーに残ったIDは、次回参照時に
    /// インデックスに存在しないため無視されます。
    pub fn destroy(&mut self, id: DetectableId) -> Option<Agent> {
        self.deactivate(id);
        let mut agent = self.agents.remove(&id)?;
        agent.vehicle.status = AgentStatus::Destroyed;
        self.names.remove(&agent.vehicle.name);
        info!("ビークル{}({})を破棄 (t={:.2}s)", agent.vehicle.name, id, self.current_time);
        Some(agent)
    }

    /// ビークルの有効・無効を切り替え
    ///
    /// 無効なビークルはインデックスに残りますが、操舵と積分は行いません。
    pub fn set_vehicle_enabled(&mut self, id: DetectableId, enabled: bool) -> bool {
        let Some(agent) = self.agents.get_mut(&id) else {
            return false;
        };
        agent.vehicle.enabled = enabled;
        self.index.set_enabled(id, enabled);
        debug!("ビークル{}: 有効={}", agent.vehicle.name, enabled);
        true
    }

    /// 障害物を追加してインデックスに登録
    pub fn add_obstacle(&mut self, obstacle: SphericalObstacle) -> Result<DetectableId, SimulationError> {
        let id = obstacle.id;
        if self.is_id_taken(id) || self.names.contains_key(&obstacle.name) {
            return Err(SimulationError::DuplicateId(obstacle.name.clone()));
        }
        self.index.register(obstacle.to_detectable());
        self.names.insert(obstacle.name.clone(), id);
        self.obstacles.insert(id, obstacle);
        Ok(id)
    }

    pub fn remove_obstacle(&mut self, id: DetectableId) -> Option<SphericalObstacle> {
        let obstacle = self.obstacles.remove(&id)?;
        self.index.deregister(id);
        self.names.remove(&obstacle.name);
        Some(obstacle)
    }

    /// 経路を登録（同名の経路は置き換え）
    pub fn add_pathway(&mut self, name: &str, pathway: Pathway) -> Arc<Pathway> {
        let pathway = Arc::new(pathway);
        if self.pathways.insert(name.to_string(), Arc::clone(&pathway)).is_some() {
            warn!("経路{}を置き換えました", name);
        }
        pathway
    }

    // --- 実行 ---

    /// 最大時間または最大ステップ数に達するまで実行
    pub fn run(&mut self) -> SimulationSummary {
        info!("=== シミュレーション実行開始 ===");

        while !self.is_finished() {
            self.step();

            if self.verbose_level > 2 {
                trace!("時刻: {:.2}秒 (ステップ: {})", self.current_time, self.step_count);
            }

            if self.step_count % PROGRESS_LOG_INTERVAL == 0 && self.verbose_level > 0 {
                let progress = (self.current_time / self.max_time) * 100.0;
                info!("進行状況: {:.1}% ({:.1}/{:.1}秒)", progress, self.current_time, self.max_time);
            }
        }
        self.phase = SimulationPhase::Finished;

        info!("=== シミュレーション完了 ===");
        info!("実行時間: {:.2}秒", self.current_time);
        info!("総ステップ数: {}", self.step_count);

        self.summary()
    }

    fn is_finished(&self) -> bool {
        self.phase == SimulationPhase::Finished
            || self.current_time + EPSILON >= self.max_time
            || self.max_steps.is_some_and(|max| self.step_count >= max)
    }

    /// 1ステップ進める
    pub fn step(&mut self) {
        if self.phase == SimulationPhase::Finished {
            return;
        }
        self.spawn_pending();
        if self.phase == SimulationPhase::Warmup {
            self.warmup();
            self.phase = SimulationPhase::Running;
        }
        self.process_radars();
        self.process_steering();
        self.refresh_index();

        self.current_time += self.dt;
        self.step_count += 1;
    }

    fn spawn_pending(&mut self) {
        let due: Vec<DetectableId> = self
            .agents
            .values()
            .filter(|agent| agent.vehicle.status == AgentStatus::Pending)
            .filter(|agent| agent.vehicle.spawn_time <= self.current_time + EPSILON)
            .map(|agent| agent.id())
            .collect();
        for id in due {
            self.activate(id);
        }
    }

    /// キュー上限に関係なく全アクティブビークルを一度走査
    fn warmup(&mut self) {
        let ids: Vec<DetectableId> = self.agents.keys().copied().collect();
        for id in ids {
            self.tick_radar(id);
        }
        debug!("ウォームアップ完了: {}台を走査", self.agents.len());
    }

    fn process_radars(&mut self) {
        for id in self.queues.update_all(self.current_time) {
            self.tick_radar(id);
        }
    }

    fn tick_radar(&mut self, id: DetectableId) {
        let Some(agent) = self.agents.get_mut(&id) else {
            return;
        };
        if !agent.vehicle.is_active() || !agent.vehicle.enabled {
            return;
        }
        let position = agent.vehicle.position();
        let forward = agent.vehicle.forward();
        let Some(radar) = agent.radar.as_mut() else {
            return;
        };
        radar.sweep(&self.index, position, self.current_time);
        agent.neighbors = refresh_neighbors(id, position, forward, radar.vehicles(), &self.index, &agent.neighborhood);
    }

    fn process_steering(&mut self) {
        let dt = self.dt;
        let now = self.current_time;
        let wrap_radius = self.wrap_radius;
        let index = &self.index;
        // 出現待ち・非アクティブも含めて保持中のID（破棄済みの参照先の判定用）
        let known_ids: BTreeSet<DetectableId> = self.agents.keys().chain(self.obstacles.keys()).copied().collect();
        for agent in self.agents.values_mut() {
            if !agent.vehicle.is_active() || !agent.vehicle.enabled {
                continue;
            }
            let Agent {
                vehicle,
                radar,
                steerings,
                neighbors,
                rng,
                ..
            } = agent;

            let radar = radar.as_ref();
            let neighbors = neighbors.as_slice();

            let ctx = SteeringContext {
                vehicle: &*vehicle,
                index,
                known_ids: &known_ids,
                radar,
                neighbors,
                dt,
                now,
            };
            let force = steerings.primary_force(&ctx, rng);

            if steerings.has_post_process() {
                vehicle.integrate_with(force, dt, |v| {
                    let ctx = SteeringContext {
                        vehicle: v,
                        index,
                        known_ids: &known_ids,
                        radar,
                        neighbors,
                        dt,
                        now,
                    };
                    steerings.post_process_velocity(&ctx, rng)
                });
            } else {
                vehicle.apply_steering_force(force, dt);
            }

            if let Some(radius) = wrap_radius {
                let position = vehicle.position();
                let wrapped = math_utils::spherical_wrap_around(position, DVec3::ZERO, radius);
                if wrapped != position {
                    trace!("ビークル{}が世界の端で折り返し (t={:.2}s)", vehicle.name, now);
                    vehicle.set_position(wrapped);
                }
            }
        }
    }

    fn refresh_index(&mut self) {
        for (id, agent) in &self.agents {
            if agent.vehicle.is_active() {
                let state = agent.vehicle.state();
                self.index.update(*id, |object| object.apply_vehicle_state(&state));
            }
        }
    }

    /// 現在の実行結果
    pub fn summary(&self) -> SimulationSummary {
        SimulationSummary {
            steps: self.step_count,
            elapsed_time: self.current_time,
            vehicles: self
                .agents
                .values()
                .map(|agent| VehicleSummary {
                    id: agent.id(),
                    name: agent.vehicle.name.clone(),
                    status: agent.vehicle.status,
                    position: agent.vehicle.position(),
                    speed: agent.vehicle.speed(),
                    distance_traveled: agent.vehicle.distance_traveled(),
                    radar_ticks: agent.radar.as_ref().map_or(0, |radar| radar.tick_count()),
                })
                .collect(),
            queues: self
                .queues
                .iter()
                .map(|queue| (queue.name.clone(), queue.stats()))
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{IDetectable, common::vec3};

    fn vehicle(engine: &mut SimulationEngine, name: &str, position: DVec3, forward: DVec3) -> Vehicle {
        let id = engine.allocate_id();
        let mut vehicle = Vehicle::new(id, name.to_string(), position, forward);
        vehicle.set_max_speed(2.0);
        vehicle.set_max_force(1.0);
        vehicle
    }

    fn radar_for(vehicle: &Vehicle, radius: f64) -> Radar {
        let mut radar = Radar::new(vehicle.id);
        radar.set_detection_radius(radius);
        radar.set_tick_length(0.1);
        radar
    }

    #[test]
    fn test_three_agent_separation_spreads_out() {
        let mut engine = SimulationEngine::new(0.1, 5.0, 1);
        let positions = [vec3(0.0, 0.0, 0.0), vec3(1.0, 0.0, 0.0), vec3(0.0, 0.0, 1.0)];
        let mut ids = Vec::new();
        for (i, position) in positions.iter().enumerate() {
            let mut v = vehicle(&mut engine, &format!("boid{}", i), *position, DVec3::Z);
            v.adjust_low_speed_steering = false;
            let radar = radar_for(&v, 10.0);
            let agent = Agent::new(v)
                .with_radar(radar)
                .with_neighborhood(NeighborhoodConfig::new(5.0, 10.0, 180.0))
                .with_steering(SteeringBehavior::Separation, 1.0);
            ids.push(engine.add_vehicle(agent).unwrap());
        }

        let min_distance = |engine: &SimulationEngine| {
            let mut min = f64::MAX;
            for a in &ids {
                for b in &ids {
                    if a < b {
                        let pa = engine.agent(*a).unwrap().vehicle.position();
                        let pb = engine.agent(*b).unwrap().vehicle.position();
                        min = min.min(pa.distance(pb));
                    }
                }
            }
            min
        };
        let before = min_distance(&engine);
        engine.step();
        for id in &ids {
            assert_eq!(engine.agent(*id).unwrap().neighbors().len(), 2);
        }
        engine.run();
        assert!(min_distance(&engine) > before);
        assert_eq!(engine.phase(), SimulationPhase::Finished);
        for id in &ids {
            let vehicle = &engine.agent(*id).unwrap().vehicle;
            assert!(vehicle.speed() <= vehicle.max_speed() + 1e-9);
        }
    }

    #[test]
    fn test_pursuer_closes_distance() {
        let mut engine = SimulationEngine::new(0.1, 10.0, 3);
        let mut quarry = vehicle(&mut engine, "rabbit", vec3(0.0, 0.0, 10.0), DVec3::X);
        quarry.set_max_speed(0.5);
        quarry.set_speed(0.5);
        let quarry_id = engine
            .add_vehicle(Agent::new(quarry).with_steering(
                SteeringBehavior::TargetSpeed(TargetSpeed { target_speed: 0.5 }),
                1.0,
            ))
            .unwrap();

        let wolf = vehicle(&mut engine, "wolf", DVec3::ZERO, DVec3::Z);
        let wolf_id = engine
            .add_vehicle(Agent::new(wolf).with_steering(SteeringBehavior::Pursuit(Pursuit::new(quarry_id)), 1.0))
            .unwrap();

        let start = engine.agent(wolf_id).unwrap().vehicle.position().distance(vec3(0.0, 0.0, 10.0));
        engine.run();
        let wolf = &engine.agent(wolf_id).unwrap().vehicle;
        let quarry = &engine.agent(quarry_id).unwrap().vehicle;
        assert!(wolf.position().distance(quarry.position()) < start);
        assert!(wolf.distance_traveled() > 0.0);
    }

    #[test]
    fn test_obstacle_ahead_is_avoided() {
        let mut engine = SimulationEngine::new(0.1, 6.0, 5);
        let rock_id = engine.allocate_id();
        engine
            .add_obstacle(SphericalObstacle::new(rock_id, "rock".to_string(), vec3(0.3, 0.0, 8.0), 0.5))
            .unwrap();

        let mut v = vehicle(&mut engine, "runner", DVec3::ZERO, DVec3::Z);
        v.set_max_force(4.0);
        v.set_speed(2.0);
        let radar = radar_for(&v, 20.0);
        let id = engine
            .add_vehicle(
                Agent::new(v)
                    .with_radar(radar)
                    .with_steering(SteeringBehavior::ObstacleAvoidance(ObstacleAvoidance::default()), 1.0),
            )
            .unwrap();

        let rock = *engine.index().get(rock_id).unwrap();
        let clearance = rock.radius() + 0.5;
        while engine.current_time < engine.max_time {
            engine.step();
            let position = engine.agent(id).unwrap().vehicle.position();
            assert!(position.distance(rock.position()) >= clearance - 0.05);
        }
        assert!(engine.agent(id).unwrap().radar.as_ref().unwrap().obstacles().contains(&rock_id));
    }

    #[test]
    fn test_pending_vehicle_spawns_on_time() {
        let mut engine = SimulationEngine::new(0.1, 2.0, 0);
        let mut v = vehicle(&mut engine, "late", DVec3::ZERO, DVec3::Z);
        v.spawn_time = 0.5;
        let id = engine.add_vehicle(Agent::new(v)).unwrap();

        engine.step();
        assert_eq!(engine.agent(id).unwrap().vehicle.status, AgentStatus::Pending);
        assert!(!engine.index().contains(id));
        for _ in 0..5 {
            engine.step();
        }
        assert_eq!(engine.agent(id).unwrap().vehicle.status, AgentStatus::Active);
        assert!(engine.index().contains(id));
    }

    #[test]
    fn test_lifecycle_deregisters_and_dequeues() {
        let mut engine = SimulationEngine::new(0.1, 2.0, 0);
        let v = vehicle(&mut engine, "a", DVec3::ZERO, DVec3::Z);
        let radar = radar_for(&v, 5.0);
        let id = engine.add_vehicle(Agent::new(v).with_radar(radar)).unwrap();
        engine.step();
        assert!(engine.index().contains(id));
        assert!(engine.queues().get("Radar").unwrap().contains(id));

        assert!(engine.deactivate(id));
        assert!(!engine.index().contains(id));
        assert!(!engine.queues().get("Radar").unwrap().contains(id));
        assert!(!engine.deactivate(id));

        assert!(engine.activate(id));
        assert!(engine.index().contains(id));

        let destroyed = engine.destroy(id).unwrap();
        assert_eq!(destroyed.vehicle.status, AgentStatus::Destroyed);
        assert!(engine.agent(id).is_none());
        assert!(engine.id_of("a").is_none());
        assert!(engine.destroy(id).is_none());
    }

    #[test]
    fn test_destroyed_quarry_disables_pursuit() {
        let mut engine = SimulationEngine::new(0.1, 2.0, 0);
        let quarry = vehicle(&mut engine, "rabbit", vec3(0.0, 0.0, 10.0), DVec3::Z);
        let quarry_id = engine.add_vehicle(Agent::new(quarry)).unwrap();
        let wolf = vehicle(&mut engine, "wolf", DVec3::ZERO, DVec3::Z);
        let wolf_id = engine
            .add_vehicle(Agent::new(wolf).with_steering(SteeringBehavior::Pursuit(Pursuit::new(quarry_id)), 1.0))
            .unwrap();

        engine.step();
        engine.destroy(quarry_id);
        engine.step();
        let wolf = engine.agent(wolf_id).unwrap();
        assert!(!wolf.steerings.iter().next().unwrap().enabled);
    }

    #[test]
    fn test_late_quarry_is_pursued_after_spawn() {
        let mut engine = SimulationEngine::new(0.1, 5.0, 0);
        let mut quarry = vehicle(&mut engine, "rabbit", vec3(0.0, 0.0, 10.0), DVec3::Z);
        quarry.spawn_time = 0.5;
        let quarry_id = engine.add_vehicle(Agent::new(quarry)).unwrap();
        let wolf = vehicle(&mut engine, "wolf", DVec3::ZERO, DVec3::Z);
        let wolf_id = engine
            .add_vehicle(Agent::new(wolf).with_steering(SteeringBehavior::Pursuit(Pursuit::new(quarry_id)), 1.0))
            .unwrap();

        engine.step();
        let pursuit = engine.agent(wolf_id).unwrap().steerings.iter().next().unwrap();
        assert!(pursuit.enabled);
        assert_eq!(pursuit.last_force(), DVec3::ZERO);

        engine.run();
        assert_eq!(engine.agent(quarry_id).unwrap().vehicle.status, AgentStatus::Active);
        let wolf = engine.agent(wolf_id).unwrap();
        assert!(wolf.steerings.iter().next().unwrap().enabled);
        assert!(wolf.vehicle.distance_traveled() > 0.0);
    }

    #[test]
    fn test_late_menace_keeps_evasion_armed() {
        let path = concat!(env!("CARGO_MANIFEST_DIR"), "/scenarios/pursuit_evasion.yaml");
        let config = ScenarioConfig::from_file(path).unwrap();
        let mut engine = SimulationEngine::from_scenario(&config, 0).unwrap();
        let rabbit = engine.id_of("rabbit").unwrap();
        let wolf = engine.id_of("wolf").unwrap();

        let evasion_enabled = |engine: &SimulationEngine| {
            engine
                .agent(rabbit)
                .unwrap()
                .steerings
                .iter()
                .find(|steering| steering.name() == "evasion")
                .is_some_and(|steering| steering.enabled)
        };

        engine.step();
        assert_eq!(engine.agent(wolf).unwrap().vehicle.status, AgentStatus::Pending);
        assert!(evasion_enabled(&engine));

        while engine.current_time < 4.0 {
            engine.step();
        }
        assert_eq!(engine.agent(wolf).unwrap().vehicle.status, AgentStatus::Active);
        assert!(evasion_enabled(&engine));
    }

    #[test]
    fn test_warmup_sweeps_each_radar_once() {
        let mut engine = SimulationEngine::new(0.1, 2.0, 0);
        let v = vehicle(&mut engine, "a", DVec3::ZERO, DVec3::Z);
        let radar = radar_for(&v, 5.0);
        let id = engine.add_vehicle(Agent::new(v).with_radar(radar)).unwrap();
        let ticks = |engine: &SimulationEngine| engine.agent(id).unwrap().radar.as_ref().unwrap().tick_count();

        engine.step();
        assert_eq!(ticks(&engine), 1);
        assert_eq!(engine.queues().get("Radar").unwrap().stats().processed_total, 0);
        engine.step();
        assert_eq!(ticks(&engine), 2);
    }

    #[test]
    fn test_vehicle_wraps_around_world_sphere() {
        let mut engine = SimulationEngine::new(0.1, 1.0, 0);
        engine.wrap_radius = Some(10.0);
        let mut v = vehicle(&mut engine, "runner", vec3(0.0, 0.0, 9.9), DVec3::Z);
        v.set_speed(2.0);
        let id = engine.add_vehicle(Agent::new(v)).unwrap();

        engine.step();
        let position = engine.agent(id).unwrap().vehicle.position();
        assert!((position - vec3(0.0, 0.0, -9.9)).length() < 1e-9);
        assert!((engine.index().get(id).unwrap().position - position).length() < 1e-12);
    }

    #[test]
    fn test_disabled_vehicle_is_frozen_but_indexed() {
        let mut engine = SimulationEngine::new(0.1, 2.0, 0);
        let mut v = vehicle(&mut engine, "idle", DVec3::ZERO, DVec3::Z);
        v.set_speed(1.0);
        let id = engine.add_vehicle(Agent::new(v)).unwrap();
        engine.step();
        assert!(engine.set_vehicle_enabled(id, false));
        let before = engine.agent(id).unwrap().vehicle.position();
        engine.step();
        assert_eq!(engine.agent(id).unwrap().vehicle.position(), before);
        assert!(!engine.index().get(id).unwrap().enabled);
    }

    #[test]
    fn test_duplicate_ids_are_rejected() {
        let mut engine = SimulationEngine::new(0.1, 1.0, 0);
        let v = vehicle(&mut engine, "a", DVec3::ZERO, DVec3::Z);
        let copy = v.clone();
        engine.add_vehicle(Agent::new(v)).unwrap();
        assert!(matches!(
            engine.add_vehicle(Agent::new(copy)),
            Err(SimulationError::DuplicateId(_))
        ));
    }

    #[test]
    fn test_max_steps_limits_run() {
        let mut engine = SimulationEngine::new(0.1, 100.0, 0);
        engine.max_steps = Some(7);
        let summary = engine.run();
        assert_eq!(summary.steps, 7);
        assert!((summary.elapsed_time - 0.7).abs() < 1e-9);
    }

    #[test]
    fn test_speed_never_exceeds_max() {
        let mut engine = SimulationEngine::new(0.05, 5.0, 11);
        let mut v = vehicle(&mut engine, "wanderer", DVec3::ZERO, DVec3::Z);
        v.set_max_speed(1.5);
        let id = engine
            .add_vehicle(
                Agent::new(v)
                    .with_steering(SteeringBehavior::Wander(Wander::default()), 3.0)
                    .with_steering(SteeringBehavior::MinimumSpeed(MinimumSpeed::default()), 1.0),
            )
            .unwrap();
        while engine.current_time < engine.max_time {
            engine.step();
            let vehicle = &engine.agent(id).unwrap().vehicle;
            assert!(vehicle.speed() <= 1.5 + 1e-9);
            assert!(vehicle.velocity().length() <= 1.5 + 1e-9);
        }
    }

    #[test]
    fn test_from_scenario() {
        let yaml = r#"
meta:
  version: "1.0"
  name: "mini"
sim:
  dt_s: 0.1
  t_max_s: 1.0
  seed: 9
world:
  queues:
    - name: Radar
      max_processed_per_update: 1
pathways:
  - id: line
    radius_m: 1.0
    points:
      - { x_m: 0.0, y_m: 0.0, z_m: 0.0 }
      - { x_m: 0.0, y_m: 0.0, z_m: 30.0 }
vehicles:
  - id: a
    position: { x_m: 0.0, y_m: 0.0, z_m: 0.0 }
    behaviors:
      - type: path_follow
        pathway: line
  - id: b
    position: { x_m: 2.0, y_m: 0.0, z_m: 0.0 }
    behaviors:
      - type: pursuit
        quarry: a
      - type: separation
        weight: 0.5
"#;
        let config = ScenarioConfig::from_yaml_str(yaml).unwrap();
        let mut engine = SimulationEngine::from_scenario(&config, 0).unwrap();
        let a = engine.id_of("a").unwrap();
        let b = engine.id_of("b").unwrap();
        assert_eq!(engine.agent(b).unwrap().steerings.len(), 2);
        assert!(engine.pathway("line").is_some());

        let summary = engine.run();
        assert_eq!(summary.steps, 10);
        assert_eq!(summary.vehicles.len(), 2);
        // キュー上限1件/更新でも全レーダーが処理される
        let radar_stats = summary.queues.iter().find(|(name, _)| name == "Radar").unwrap().1;
        assert!(radar_stats.processed_total >= 2);
        assert!(engine.agent(a).unwrap().vehicle.position().z > 0.0);
    }
}
