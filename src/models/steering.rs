use std::collections::BTreeSet;

use glam::DVec3;
use rand::Rng;
use tracing::{debug, warn};

use crate::models::{
    behaviors::{Follow, MinimumSpeed, NeighborAvoidance, Seek, SpeedNoise, TargetSpeed, Tether, Wander},
    common::DetectableId,
    detectable::DetectableObject,
    flocking,
    obstacle_avoidance::{ObstacleAvoidance, ObstacleRepulsion},
    path_following::{PathFollower, PredictivePathFollower},
    pursuit::{Evasion, Pursuit},
    radar::Radar,
    spatial_index::SpatialIndex,
    vehicle::Vehicle,
};

/// 操舵力計算時に参照する読み取り専用の世界状態
///
/// 空間インデックスには前ステップ終了時点の全オブジェクトの状態が入っており、
/// 力の計算中は変更されません。`known_ids`はエンジンが保持している全ID
/// （出現待ち・非アクティブを含む）で、インデックスに無い参照先が
/// 一時的に不在なのか破棄済みなのかの判定に使います。
#[derive(Debug, Clone, Copy)]
pub struct SteeringContext<'a> {
    pub vehicle: &'a Vehicle,
    pub index: &'a SpatialIndex,
    pub known_ids: &'a BTreeSet<DetectableId>,
    pub radar: Option<&'a Radar>,
    pub neighbors: &'a [DetectableId],
    pub dt: f64,
    pub now: f64,
}

impl<'a> SteeringContext<'a> {
    /// エンジンが保持しているIDか（破棄済みならfalse）
    pub fn is_known(&self, id: DetectableId) -> bool {
        self.known_ids.contains(&id)
    }

    /// 参照先の解決
    ///
    /// インデックスにあれば`Some(Some)`、一時的に不在なら`Some(None)`、
    /// 破棄済みなら`None`。
    fn resolve(&self, id: DetectableId) -> Option<Option<&'a DetectableObject>> {
        match self.index.get(id) {
            Some(object) => Some(Some(object)),
            None if self.is_known(id) => Some(None),
            None => None,
        }
    }

    /// 近傍リストのオブジェクト（既に登録解除されたものは除く）
    pub fn neighbor_objects(&self) -> impl Iterator<Item = &'a DetectableObject> + 'a {
        let index = self.index;
        self.neighbors.iter().filter_map(move |id| index.get(*id))
    }

    /// レーダーが検知したビークル
    pub fn radar_vehicles(&self) -> impl Iterator<Item = &'a DetectableObject> + 'a {
        let index = self.index;
        self.radar
            .map(|radar| radar.vehicles())
            .unwrap_or(&[])
            .iter()
            .filter_map(move |id| index.get(*id))
    }

    /// レーダーが検知した障害物
    pub fn radar_obstacles(&self) -> impl Iterator<Item = &'a DetectableObject> + 'a {
        let index = self.index;
        self.radar
            .map(|radar| radar.obstacles())
            .unwrap_or(&[])
            .iter()
            .filter_map(move |id| index.get(*id))
    }
}

/// 操舵行動の種類
#[derive(Debug, Clone)]
pub enum SteeringBehavior {
    Separation,
    Alignment,
    Cohesion,
    MatchingVelocity,
    Pursuit(Pursuit),
    Evasion(Evasion),
    PathFollow(PathFollower),
    PathFollowPredictive(PredictivePathFollower),
    Wander(Wander),
    ObstacleAvoidance(ObstacleAvoidance),
    NeighborAvoidance(NeighborAvoidance),
    Tether(Tether),
    MinimumSpeed(MinimumSpeed),
    SpeedNoise(SpeedNoise),
    Seek(Seek),
    TargetSpeed(TargetSpeed),
    Follow(Follow),
    ObstacleRepulsion(ObstacleRepulsion),
}

impl SteeringBehavior {
    pub fn name(&self) -> &'static str {
        match self {
            SteeringBehavior::Separation => "separation",
            SteeringBehavior::Alignment => "alignment",
            SteeringBehavior::Cohesion => "cohesion",
            SteeringBehavior::MatchingVelocity => "matching_velocity",
            SteeringBehavior::Pursuit(_) => "pursuit",
            SteeringBehavior::Evasion(_) => "evasion",
            SteeringBehavior::PathFollow(_) => "path_follow",
            SteeringBehavior::PathFollowPredictive(_) => "path_follow_predictive",
            SteeringBehavior::Wander(_) => "wander",
            SteeringBehavior::ObstacleAvoidance(_) => "obstacle_avoidance",
            SteeringBehavior::NeighborAvoidance(_) => "neighbor_avoidance",
            SteeringBehavior::Tether(_) => "tether",
            SteeringBehavior::MinimumSpeed(_) => "minimum_speed",
            SteeringBehavior::SpeedNoise(_) => "speed_noise",
            SteeringBehavior::Seek(_) => "seek",
            SteeringBehavior::TargetSpeed(_) => "target_speed",
            SteeringBehavior::Follow(_) => "follow",
            SteeringBehavior::ObstacleRepulsion(_) => "obstacle_repulsion",
        }
    }

    /// 主操舵の合計後に速度を置き換える後処理か
    pub fn is_post_process(&self) -> bool {
        matches!(
            self,
            SteeringBehavior::Tether(_)
                | SteeringBehavior::MinimumSpeed(_)
                | SteeringBehavior::SpeedNoise(_)
                | SteeringBehavior::ObstacleRepulsion(_)
        )
    }

    /// 主操舵の力を計算
    ///
    /// # 戻り値
    ///
    /// 参照先（追跡対象など）が破棄済みの場合は`None`。出現前や非アクティブで
    /// 一時的に不在の場合はゼロ。
    pub fn compute_force<R: Rng + ?Sized>(&mut self, ctx: &SteeringContext<'_>, rng: &mut R) -> Option<DVec3> {
        let vehicle = ctx.vehicle;
        let force = match self {
            SteeringBehavior::Separation => flocking::separation(vehicle, ctx.neighbor_objects()),
            SteeringBehavior::Alignment => flocking::alignment(vehicle, ctx.neighbor_objects()),
            SteeringBehavior::Cohesion => flocking::cohesion(vehicle, ctx.neighbor_objects()),
            SteeringBehavior::MatchingVelocity => flocking::matching_velocity(vehicle, ctx.neighbor_objects()),
            SteeringBehavior::Pursuit(pursuit) => match ctx.resolve(pursuit.quarry)? {
                Some(quarry) => pursuit.compute(vehicle, quarry),
                None => DVec3::ZERO,
            },
            SteeringBehavior::Follow(follow) => match ctx.resolve(follow.target)? {
                Some(target) => follow.compute(vehicle, target),
                None => DVec3::ZERO,
            },
            SteeringBehavior::Evasion(evasion) => {
                if !evasion.menaces.iter().any(|id| ctx.is_known(*id)) {
                    return None;
                }
                let menaces: Vec<DetectableObject> = evasion
                    .menaces
                    .iter()
                    .filter_map(|id| ctx.index.get(*id).copied())
                    .collect();
                match evasion.nearest_menace(vehicle, &menaces) {
                    Some(menace) => evasion.compute(vehicle, menace),
                    None => DVec3::ZERO,
                }
            }
            SteeringBehavior::PathFollow(follower) => follower.compute(vehicle),
            SteeringBehavior::PathFollowPredictive(follower) => follower.compute(vehicle),
            SteeringBehavior::Wander(wander) => wander.compute(vehicle, ctx.dt, rng),
            SteeringBehavior::ObstacleAvoidance(avoidance) => avoidance.compute(vehicle, ctx.radar_obstacles()),
            SteeringBehavior::NeighborAvoidance(avoidance) => avoidance.compute(vehicle, ctx.radar_vehicles()),
            SteeringBehavior::Seek(seek) => seek.compute(vehicle),
            SteeringBehavior::TargetSpeed(target) => target.compute(vehicle),
            SteeringBehavior::Tether(_)
            | SteeringBehavior::MinimumSpeed(_)
            | SteeringBehavior::SpeedNoise(_)
            | SteeringBehavior::ObstacleRepulsion(_) => DVec3::ZERO,
        };
        Some(force)
    }

    /// 後処理の置換速度を計算（主操舵の行動はゼロ）
    ///
    /// `ctx.vehicle`は主操舵の結果（`desired_velocity`）を反映済みのビークルです。
    pub fn post_process_velocity<R: Rng + ?Sized>(&mut self, ctx: &SteeringContext<'_>, rng: &mut R) -> DVec3 {
        let vehicle = ctx.vehicle;
        match self {
            SteeringBehavior::Tether(tether) => tether.compute(vehicle),
            SteeringBehavior::MinimumSpeed(minimum) => minimum.compute(vehicle),
            SteeringBehavior::SpeedNoise(noise) => noise.compute(vehicle, ctx.dt, rng),
            SteeringBehavior::ObstacleRepulsion(repulsion) => repulsion.compute(vehicle, ctx.radar_obstacles()),
            _ => DVec3::ZERO,
        }
    }
}

/// 重み付きの操舵行動
///
/// 力がゼロになった時点を「到着」、ゼロから非ゼロになった時点を「移動開始」として
/// 1回ずつ記録します。
#[derive(Debug, Clone)]
pub struct Steering {
    pub behavior: SteeringBehavior,
    pub enabled: bool,
    weight: f64,
    reported_arrival: bool,
    reported_move: bool,
    last_force: DVec3,
    arrival_count: u32,
}

impl Steering {
    pub fn new(behavior: SteeringBehavior, weight: f64) -> Self {
        let mut steering = Self {
            behavior,
            enabled: true,
            weight: 1.0,
            reported_arrival: false,
            reported_move: false,
            last_force: DVec3::ZERO,
            arrival_count: 0,
        };
        steering.set_weight(weight);
        steering
    }

    pub fn weight(&self) -> f64 {
        self.weight
    }

    /// 重みを設定（負値や非有限値は0）
    pub fn set_weight(&mut self, weight: f64) {
        self.weight = if weight.is_finite() { weight.max(0.0) } else { 0.0 };
    }

    pub fn name(&self) -> &'static str {
        self.behavior.name()
    }

    pub fn is_post_process(&self) -> bool {
        self.behavior.is_post_process()
    }

    /// 直近に計算した重み付き前の力
    pub fn last_force(&self) -> DVec3 {
        self.last_force
    }

    pub fn arrival_count(&self) -> u32 {
        self.arrival_count
    }

    /// 重み付きの主操舵力
    pub fn weighted_force<R: Rng + ?Sized>(&mut self, ctx: &SteeringContext<'_>, rng: &mut R) -> DVec3 {
        if !self.enabled || self.is_post_process() {
            return DVec3::ZERO;
        }
        let Some(force) = self.behavior.compute_force(ctx, rng) else {
            warn!(
                "ビークル{}の操舵'{}'は参照先が破棄されたため無効化されました",
                ctx.vehicle.name,
                self.name()
            );
            self.enabled = false;
            self.last_force = DVec3::ZERO;
            return DVec3::ZERO;
        };
        let force = if force.is_finite() { force } else { DVec3::ZERO };
        self.track_events(&ctx.vehicle.name, force, ctx.now);
        self.last_force = force;
        force * self.weight
    }

    /// 重み付きの後処理速度
    pub fn weighted_post_process<R: Rng + ?Sized>(&mut self, ctx: &SteeringContext<'_>, rng: &mut R) -> DVec3 {
        if !self.enabled || !self.is_post_process() {
            return DVec3::ZERO;
        }
        let velocity = self.behavior.post_process_velocity(ctx, rng);
        let velocity = if velocity.is_finite() { velocity } else { DVec3::ZERO };
        self.last_force = velocity;
        velocity * self.weight
    }

    fn track_events(&mut self, owner: &str, force: DVec3, now: f64) {
        if force == DVec3::ZERO {
            if !self.reported_arrival && self.reported_move {
                self.arrival_count += 1;
                debug!("ビークル{}: 操舵'{}'が到着 (t={:.2}s)", owner, self.name(), now);
            }
            self.reported_arrival = true;
            self.reported_move = false;
        } else {
            if !self.reported_move {
                debug!("ビークル{}: 操舵'{}'で移動開始 (t={:.2}s)", owner, self.name(), now);
            }
            self.reported_move = true;
            self.reported_arrival = false;
        }
    }
}

/// ビークルに付随する操舵行動の集合
#[derive(Debug, Clone, Default)]
pub struct SteeringSet {
    steerings: Vec<Steering>,
}

impl SteeringSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, steering: Steering) {
        self.steerings.push(steering);
    }

    pub fn len(&self) -> usize {
        self.steerings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steerings.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Steering> {
        self.steerings.iter()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Steering> {
        self.steerings.iter_mut()
    }

    /// 有効な後処理があるか
    pub fn has_post_process(&self) -> bool {
        self.steerings.iter().any(|s| s.enabled && s.is_post_process())
    }

    /// 主操舵の重み付き合計
    pub fn primary_force<R: Rng + ?Sized>(&mut self, ctx: &SteeringContext<'_>, rng: &mut R) -> DVec3 {
        self.steerings
            .iter_mut()
            .map(|steering| steering.weighted_force(ctx, rng))
            .fold(DVec3::ZERO, |sum, force| sum + force)
    }

    /// 後処理の重み付き合計（ゼロの場合は速度を置き換えない）
    pub fn post_process_velocity<R: Rng + ?Sized>(&mut self, ctx: &SteeringContext<'_>, rng: &mut R) -> DVec3 {
        self.steerings
            .iter_mut()
            .map(|steering| steering.weighted_post_process(ctx, rng))
            .fold(DVec3::ZERO, |sum, velocity| sum + velocity)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::common::{DetectableKind, vec3};
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    static NO_KNOWN_IDS: BTreeSet<DetectableId> = BTreeSet::new();

    fn vehicle() -> Vehicle {
        let mut vehicle = Vehicle::new(DetectableId(1), "v1".to_string(), DVec3::ZERO, DVec3::Z);
        vehicle.set_max_speed(5.0);
        vehicle.set_speed(1.0);
        vehicle
    }

    fn context<'a>(vehicle: &'a Vehicle, index: &'a SpatialIndex, neighbors: &'a [DetectableId]) -> SteeringContext<'a> {
        SteeringContext {
            vehicle,
            index,
            known_ids: &NO_KNOWN_IDS,
            radar: None,
            neighbors,
            dt: 0.1,
            now: 0.0,
        }
    }

    #[test]
    fn test_weighted_sum() {
        let v = vehicle();
        let index = SpatialIndex::default();
        let mut rng = StdRng::seed_from_u64(0);
        let mut set = SteeringSet::new();
        set.push(Steering::new(
            SteeringBehavior::Seek(Seek {
                target: vec3(0.0, 0.0, 10.0),
                consider_velocity: false,
            }),
            2.0,
        ));
        set.push(Steering::new(SteeringBehavior::TargetSpeed(TargetSpeed { target_speed: 3.0 }), 0.5));
        let force = set.primary_force(&context(&v, &index, &[]), &mut rng);
        assert!((force - vec3(0.0, 0.0, 20.05)).length() < 1e-9);
    }

    #[test]
    fn test_negative_weight_is_clamped() {
        let steering = Steering::new(SteeringBehavior::Separation, -3.0);
        assert_eq!(steering.weight(), 0.0);
    }

    #[test]
    fn test_missing_quarry_disables_behavior() {
        let v = vehicle();
        let index = SpatialIndex::default();
        let mut rng = StdRng::seed_from_u64(0);
        let mut steering = Steering::new(SteeringBehavior::Pursuit(Pursuit::new(DetectableId(42))), 1.0);
        assert_eq!(steering.weighted_force(&context(&v, &index, &[]), &mut rng), DVec3::ZERO);
        assert!(!steering.enabled);
    }

    #[test]
    fn test_unspawned_quarry_keeps_behavior_enabled() {
        let v = vehicle();
        let mut index = SpatialIndex::default();
        let known_ids: BTreeSet<DetectableId> = [DetectableId(1), DetectableId(42)].into_iter().collect();
        let mut rng = StdRng::seed_from_u64(0);
        let mut steering = Steering::new(SteeringBehavior::Pursuit(Pursuit::new(DetectableId(42))), 1.0);

        let ctx = SteeringContext {
            known_ids: &known_ids,
            ..context(&v, &index, &[])
        };
        assert_eq!(steering.weighted_force(&ctx, &mut rng), DVec3::ZERO);
        assert!(steering.enabled);

        // 出現後は追跡を始める
        index.register(DetectableObject::new(DetectableId(42), DetectableKind::Vehicle, vec3(0.0, 0.0, 10.0), 0.5));
        let ctx = SteeringContext {
            known_ids: &known_ids,
            ..context(&v, &index, &[])
        };
        assert!(steering.weighted_force(&ctx, &mut rng).z > 0.0);
        assert!(steering.enabled);
    }

    #[test]
    fn test_evasion_waits_for_unspawned_menace() {
        let v = vehicle();
        let index = SpatialIndex::default();
        let known_ids: BTreeSet<DetectableId> = [DetectableId(7)].into_iter().collect();
        let mut rng = StdRng::seed_from_u64(0);
        let mut steering = Steering::new(SteeringBehavior::Evasion(Evasion::new(vec![DetectableId(7)])), 1.0);

        let ctx = SteeringContext {
            known_ids: &known_ids,
            ..context(&v, &index, &[])
        };
        assert_eq!(steering.weighted_force(&ctx, &mut rng), DVec3::ZERO);
        assert!(steering.enabled);

        // 全ての脅威が破棄されたら無効化
        steering.weighted_force(&context(&v, &index, &[]), &mut rng);
        assert!(!steering.enabled);
    }

    #[test]
    fn test_follow_seeks_point_behind_target() {
        let v = vehicle();
        let mut index = SpatialIndex::default();
        let mut leader = DetectableObject::new(DetectableId(2), DetectableKind::Vehicle, vec3(0.0, 0.0, 10.0), 0.5);
        leader.forward = DVec3::X;
        index.register(leader);
        let known_ids: BTreeSet<DetectableId> = [DetectableId(2)].into_iter().collect();
        let mut rng = StdRng::seed_from_u64(0);
        let mut follow = Follow::new(DetectableId(2));
        follow.distance = 3.0;
        follow.consider_velocity = false;
        let mut steering = Steering::new(SteeringBehavior::Follow(follow), 1.0);

        let ctx = SteeringContext {
            known_ids: &known_ids,
            ..context(&v, &index, &[])
        };
        let force = steering.weighted_force(&ctx, &mut rng);
        assert!((force - vec3(-3.0, 0.0, 10.0)).length() < 1e-9);
    }

    #[test]
    fn test_post_process_is_not_part_of_primary_sum() {
        let v = vehicle();
        let index = SpatialIndex::default();
        let mut rng = StdRng::seed_from_u64(0);
        let mut set = SteeringSet::new();
        set.push(Steering::new(SteeringBehavior::MinimumSpeed(MinimumSpeed::default()), 1.0));
        assert_eq!(set.primary_force(&context(&v, &index, &[]), &mut rng), DVec3::ZERO);
        assert!(set.has_post_process());
        let velocity = set.post_process_velocity(&context(&v, &index, &[]), &mut rng);
        assert_eq!(velocity, DVec3::Z * 4.0);
    }

    #[test]
    fn test_separation_reads_neighbor_list() {
        let v = vehicle();
        let mut index = SpatialIndex::default();
        index.register(DetectableObject::new(DetectableId(2), DetectableKind::Vehicle, vec3(2.0, 0.0, 0.0), 0.5));
        let neighbors = [DetectableId(2), DetectableId(99)];
        let mut rng = StdRng::seed_from_u64(0);
        let mut steering = Steering::new(SteeringBehavior::Separation, 1.0);
        let force = steering.weighted_force(&context(&v, &index, &neighbors), &mut rng);
        assert!((force - vec3(-1.0, 0.0, 0.0)).length() < 1e-12);
    }

    #[test]
    fn test_arrival_is_counted_once() {
        let mut v = vehicle();
        let index = SpatialIndex::default();
        let mut rng = StdRng::seed_from_u64(0);
        let mut steering = Steering::new(
            SteeringBehavior::Seek(Seek {
                target: vec3(0.0, 0.0, 5.0),
                consider_velocity: false,
            }),
            1.0,
        );
        steering.weighted_force(&context(&v, &index, &[]), &mut rng);
        v = Vehicle::new(DetectableId(1), "v1".to_string(), vec3(0.0, 0.0, 5.0), DVec3::Z);
        steering.weighted_force(&context(&v, &index, &[]), &mut rng);
        steering.weighted_force(&context(&v, &index, &[]), &mut rng);
        assert_eq!(steering.arrival_count(), 1);
    }
}
