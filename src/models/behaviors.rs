use glam::DVec3;
use rand::Rng;

use crate::models::{
    common::{DetectableId, EPSILON, math_utils},
    traits::IDetectable,
    vehicle::Vehicle,
};

/// 徘徊行動
///
/// 側方・上方のオフセットをランダムウォークさせ、前方向に加えます。
#[derive(Debug, Clone, PartialEq)]
pub struct Wander {
    /// 側方オフセットの上限
    pub max_latitude_side: f64,
    /// 上方オフセットの上限
    pub max_latitude_up: f64,
    /// 平滑化係数（dtに乗じる）
    pub smooth_rate: f64,
    wander_side: f64,
    wander_up: f64,
}

impl Default for Wander {
    fn default() -> Self {
        Self {
            max_latitude_side: 2.0,
            max_latitude_up: 2.0,
            smooth_rate: 0.05,
            wander_side: 0.0,
            wander_up: 0.0,
        }
    }
}

impl Wander {
    pub fn offsets(&self) -> (f64, f64) {
        (self.wander_side, self.wander_up)
    }

    pub fn compute<R: Rng + ?Sized>(&mut self, vehicle: &Vehicle, dt: f64, rng: &mut R) -> DVec3 {
        let speed = vehicle.max_speed();
        let side_limit = self.max_latitude_side.abs();
        let up_limit = self.max_latitude_up.abs();

        let random_side = math_utils::scalar_random_walk(self.wander_side, speed, -side_limit, side_limit, rng);
        let random_up = math_utils::scalar_random_walk(self.wander_up, speed, -up_limit, up_limit, rng);
        let rate = self.smooth_rate * dt;
        self.wander_side = math_utils::blend_scalar_into_accumulator(rate, random_side, self.wander_side);
        self.wander_up = math_utils::blend_scalar_into_accumulator(rate, random_up, self.wander_up);

        vehicle.side() * self.wander_side + vehicle.up() * self.wander_up + vehicle.forward()
    }
}

/// 係留（後処理）: 係留点から離れすぎたら引き戻す
#[derive(Debug, Clone, PartialEq)]
pub struct Tether {
    pub tether_position: DVec3,
    pub maximum_distance: f64,
}

impl Tether {
    pub fn new(tether_position: DVec3) -> Self {
        Self {
            tether_position,
            maximum_distance: 30.0,
        }
    }

    pub fn compute(&self, vehicle: &Vehicle) -> DVec3 {
        let difference = self.tether_position - vehicle.position();
        let distance = difference.length();
        if distance > self.maximum_distance {
            (difference + vehicle.desired_velocity()) / 2.0
        } else {
            DVec3::ZERO
        }
    }
}

/// 最低速度（後処理）
#[derive(Debug, Clone, PartialEq)]
pub struct MinimumSpeed {
    pub minimum_speed: f64,
    /// 望む速度がゼロのとき前方へ進むか
    pub move_forward_when_zero: bool,
}

impl Default for MinimumSpeed {
    fn default() -> Self {
        Self {
            minimum_speed: 4.0,
            move_forward_when_zero: true,
        }
    }
}

impl MinimumSpeed {
    pub fn compute(&self, vehicle: &Vehicle) -> DVec3 {
        let desired = vehicle.desired_velocity();
        let speed = desired.length();
        if speed <= EPSILON {
            return if self.move_forward_when_zero {
                vehicle.forward() * self.minimum_speed
            } else {
                DVec3::ZERO
            };
        }
        if speed < self.minimum_speed {
            desired / speed * self.minimum_speed
        } else {
            DVec3::ZERO
        }
    }
}

/// 速度・方向の揺らぎ（後処理）
///
/// 望む速度を側方へランダムに傾け、大きさもランダムに変化させます。
/// ノイズはランダムウォークで時間的に連続させます。
#[derive(Debug, Clone, PartialEq)]
pub struct SpeedNoise {
    /// 方向揺らぎの大きさ（望む速度の大きさに対する側方成分の割合）
    pub direction_amount: f64,
    /// 速さ揺らぎの大きさ（割合）
    pub speed_impact: f64,
    /// ノイズのランダムウォーク速度（1秒あたり）
    pub walk_rate: f64,
    direction_noise: f64,
    speed_noise: f64,
}

impl Default for SpeedNoise {
    fn default() -> Self {
        Self {
            direction_amount: 0.2,
            speed_impact: 0.0,
            walk_rate: 1.0,
            direction_noise: 0.0,
            speed_noise: 0.0,
        }
    }
}

impl SpeedNoise {
    pub fn compute<R: Rng + ?Sized>(&mut self, vehicle: &Vehicle, dt: f64, rng: &mut R) -> DVec3 {
        let desired = vehicle.desired_velocity();
        let speed = desired.length();
        if speed <= EPSILON {
            return DVec3::ZERO;
        }
        let step = self.walk_rate.max(0.0) * dt;
        self.direction_noise = math_utils::scalar_random_walk(self.direction_noise, step, -1.0, 1.0, rng);
        self.speed_noise = math_utils::scalar_random_walk(self.speed_noise, step, -1.0, 1.0, rng);

        let unit = desired / speed;
        let lateral = math_utils::perpendicular_component(vehicle.side(), unit).normalize_or_zero();
        let direction = (unit + lateral * self.direction_noise * self.direction_amount).normalize_or_zero();
        let scale = (1.0 + self.speed_noise * self.speed_impact).max(0.0);
        direction * speed * scale
    }
}

/// 固定点へのシーク
#[derive(Debug, Clone, PartialEq)]
pub struct Seek {
    pub target: DVec3,
    pub consider_velocity: bool,
}

impl Seek {
    pub fn compute(&self, vehicle: &Vehicle) -> DVec3 {
        vehicle.seek_vector(self.target, self.consider_velocity)
    }
}

/// 追従: 対象の後方`distance`の点をシーク
#[derive(Debug, Clone, PartialEq)]
pub struct Follow {
    pub target: DetectableId,
    /// 対象の前方向に沿って後ろへ離れる距離（メートル）
    pub distance: f64,
    /// 現在速度を差し引くか（近づくと減速する）
    pub consider_velocity: bool,
}

impl Follow {
    pub fn new(target: DetectableId) -> Self {
        Self {
            target,
            distance: 2.0,
            consider_velocity: true,
        }
    }

    pub fn compute<D: IDetectable + ?Sized>(&self, vehicle: &Vehicle, target: &D) -> DVec3 {
        let behind = target.position() - target.forward() * self.distance;
        vehicle.seek_vector(behind, self.consider_velocity)
    }
}

/// 目標速度の維持
#[derive(Debug, Clone, PartialEq)]
pub struct TargetSpeed {
    pub target_speed: f64,
}

impl TargetSpeed {
    pub fn compute(&self, vehicle: &Vehicle) -> DVec3 {
        vehicle.target_speed_vector(self.target_speed)
    }
}

/// 近傍との衝突回避（最接近予測）
#[derive(Debug, Clone, PartialEq)]
pub struct NeighborAvoidance {
    /// 平行・反平行とみなす角度の余弦
    pub avoid_angle_cos: f64,
    /// 予測時間の上限（秒）
    pub min_time_to_collision: f64,
}

impl Default for NeighborAvoidance {
    fn default() -> Self {
        Self {
            avoid_angle_cos: 0.707,
            min_time_to_collision: 2.0,
        }
    }
}

impl NeighborAvoidance {
    /// 最も早く衝突しそうな相手と最接近時の相手位置
    pub fn find_threat<'a, D, I>(&self, vehicle: &Vehicle, others: I) -> Option<(&'a D, DVec3)>
    where
        D: IDetectable + 'a,
        I: IntoIterator<Item = &'a D>,
    {
        let mut min_time = self.min_time_to_collision;
        let mut threat = None;
        for other in others {
            if other.detectable_id() == vehicle.id {
                continue;
            }
            let danger_threshold = vehicle.radius() + other.radius();
            let time = vehicle.predict_nearest_approach_time(other);
            if time >= 0.0 && time < min_time {
                let (distance, _, other_position) = vehicle.compute_nearest_approach_positions(other, time);
                if distance < danger_threshold {
                    min_time = time;
                    threat = Some((other, other_position));
                }
            }
        }
        threat
    }

    pub fn compute<'a, D, I>(&self, vehicle: &Vehicle, others: I) -> DVec3
    where
        D: IDetectable + 'a,
        I: IntoIterator<Item = &'a D>,
    {
        let Some((threat, threat_position)) = self.find_threat(vehicle, others) else {
            return DVec3::ZERO;
        };

        let side = vehicle.side();
        let parallelness = vehicle.forward().dot(threat.forward());
        let away_from = |offset: DVec3| if offset.dot(side) > 0.0 { -1.0 } else { 1.0 };

        let steer = if parallelness < -self.avoid_angle_cos {
            // 正面衝突: 最接近時の相手位置から離れる
            away_from(threat_position - vehicle.position())
        } else if parallelness > self.avoid_angle_cos {
            // 並走: 現在の相手位置から離れる
            away_from(threat.position() - vehicle.position())
        } else if vehicle.speed() < threat.speed()
            || threat.speed() <= EPSILON
            || lower_id_yields(vehicle.id, threat.detectable_id(), vehicle.speed(), threat.speed())
        {
            // 交差: 遅い方（同速ならIDの小さい方）が相手の後ろに回る
            away_from(threat.velocity())
        } else {
            0.0
        };

        side * steer * (vehicle.radius() + threat.radius())
    }
}

fn lower_id_yields(own: DetectableId, other: DetectableId, own_speed: f64, other_speed: f64) -> bool {
    (own_speed - other_speed).abs() <= EPSILON && own < other
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{
        common::{DetectableKind, vec3},
        detectable::DetectableObject,
    };
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    fn vehicle(position: DVec3, forward: DVec3, speed: f64) -> Vehicle {
        let mut vehicle = Vehicle::new(DetectableId(1), "v".to_string(), position, forward);
        vehicle.set_max_speed(10.0);
        vehicle.set_speed(speed);
        vehicle
    }

    fn desired(v: &mut Vehicle, force: DVec3) {
        v.has_inertia = true;
        v.acceleration_smoothing = crate::models::vehicle::AccelerationSmoothing::Fixed(1.0);
        v.set_max_force(100.0);
        v.integrate(force, 0.1);
    }

    #[test]
    fn test_wander_stays_within_latitude() {
        let mut rng = StdRng::seed_from_u64(1);
        let v = vehicle(DVec3::ZERO, DVec3::Z, 1.0);
        let mut wander = Wander::default();
        for _ in 0..200 {
            let force = wander.compute(&v, 1.0, &mut rng);
            let (side, up) = wander.offsets();
            assert!(side.abs() <= 2.0 && up.abs() <= 2.0);
            assert!((force.dot(v.forward()) - 1.0).abs() < 1e-9);
        }
    }

    #[test]
    fn test_tether_pulls_back_when_far() {
        let v = vehicle(vec3(40.0, 0.0, 0.0), DVec3::Z, 0.0);
        let tether = Tether::new(DVec3::ZERO);
        let force = tether.compute(&v);
        assert!((force - vec3(-20.0, 0.0, 0.0)).length() < 1e-9);

        let near = vehicle(vec3(10.0, 0.0, 0.0), DVec3::Z, 0.0);
        assert_eq!(tether.compute(&near), DVec3::ZERO);
    }

    #[test]
    fn test_minimum_speed() {
        let minimum = MinimumSpeed::default();
        let idle = vehicle(DVec3::ZERO, DVec3::X, 0.0);
        assert_eq!(minimum.compute(&idle), DVec3::X * 4.0);

        let mut slow = vehicle(DVec3::ZERO, DVec3::Z, 1.0);
        desired(&mut slow, DVec3::ZERO);
        assert!((minimum.compute(&slow) - DVec3::Z * 4.0).length() < 1e-9);

        let mut fast = vehicle(DVec3::ZERO, DVec3::Z, 5.0);
        desired(&mut fast, DVec3::ZERO);
        assert_eq!(minimum.compute(&fast), DVec3::ZERO);
    }

    #[test]
    fn test_speed_noise_keeps_speed_without_impact() {
        let mut rng = StdRng::seed_from_u64(3);
        let mut v = vehicle(DVec3::ZERO, DVec3::Z, 2.0);
        desired(&mut v, DVec3::ZERO);
        let mut noise = SpeedNoise::default();
        for _ in 0..50 {
            let velocity = noise.compute(&v, 0.1, &mut rng);
            assert!((velocity.length() - 2.0).abs() < 1e-9);
            assert!(velocity.dot(DVec3::Z) > 0.0);
        }
    }

    #[test]
    fn test_seek_and_target_speed() {
        let v = vehicle(DVec3::ZERO, DVec3::Z, 1.0);
        let seek = Seek {
            target: vec3(0.0, 0.0, 5.0),
            consider_velocity: true,
        };
        assert_eq!(seek.compute(&v), vec3(0.0, 0.0, 4.0));
        let target_speed = TargetSpeed { target_speed: 1.05 };
        assert!((target_speed.compute(&v) - vec3(0.0, 0.0, 0.05)).length() < 1e-9);
    }

    #[test]
    fn test_follow_slows_when_considering_velocity() {
        let v = vehicle(DVec3::ZERO, DVec3::Z, 1.0);
        let mut leader = DetectableObject::new(DetectableId(2), DetectableKind::Vehicle, vec3(0.0, 0.0, 6.0), 0.5);
        leader.forward = DVec3::Z;
        let follow = Follow::new(DetectableId(2));
        // 後方2mの点(0,0,4)へのシークから現在速度を引く
        assert!((follow.compute(&v, &leader) - vec3(0.0, 0.0, 3.0)).length() < 1e-12);
    }

    #[test]
    fn test_neighbor_avoidance_head_on() {
        let v = vehicle(DVec3::ZERO, DVec3::Z, 1.0);
        let mut other = DetectableObject::new(DetectableId(2), DetectableKind::Vehicle, vec3(0.2, 0.0, 3.0), 0.5);
        other.forward = -DVec3::Z;
        other.velocity = vec3(0.0, 0.0, -1.0);
        let avoidance = NeighborAvoidance::default();
        let force = avoidance.compute(&v, [&other]);
        // 相手は+x側（side = -x の反対側）なので side 方向へ避ける
        assert!((force - v.side() * 1.0).length() < 1e-9);
    }

    #[test]
    fn test_neighbor_avoidance_ignores_distant_future() {
        let v = vehicle(DVec3::ZERO, DVec3::Z, 1.0);
        let mut other = DetectableObject::new(DetectableId(2), DetectableKind::Vehicle, vec3(0.0, 0.0, 30.0), 0.5);
        other.forward = -DVec3::Z;
        other.velocity = vec3(0.0, 0.0, -1.0);
        assert_eq!(NeighborAvoidance::default().compute(&v, [&other]), DVec3::ZERO);
    }
}
