use glam::DVec3;

use crate::models::{
    common::{DetectableId, EPSILON, math_utils},
    traits::IDetectable,
    vehicle::Vehicle,
};

/// 球形障害物との交差情報
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PathIntersection {
    pub obstacle: DetectableId,
    /// 衝突点までの前方距離
    pub distance: f64,
    /// 障害物の中心
    pub center: DVec3,
}

/// 前方レイと球（障害物半径 + 自半径）の交差判定
///
/// ビークルのローカル座標系で二次方程式を解き、前方にある近い方の解を返します。
/// 障害物が完全に後方にある場合や交差しない場合は`None`です。
pub fn find_next_intersection_with_sphere<D: IDetectable + ?Sized>(
    vehicle: &Vehicle,
    obstacle: &D,
) -> Option<PathIntersection> {
    let local_center = vehicle.local_space().localize_position(obstacle.position());
    let combined_radius = obstacle.radius() + vehicle.radius();

    // 前方（ローカルz軸）のみを対象とする
    if local_center.z + combined_radius < 0.0 {
        return None;
    }

    let b = -2.0 * local_center.z;
    let c = local_center.length_squared() - combined_radius * combined_radius;
    let discriminant = b * b - 4.0 * c;
    if discriminant < 0.0 {
        return None;
    }

    let root = discriminant.sqrt();
    let p = (-b + root) / 2.0;
    let q = (-b - root) / 2.0;
    if p < 0.0 && q < 0.0 {
        return None;
    }
    // 内側にいる場合(q < 0)は前方側の解を使う
    let distance = if p > 0.0 && q > 0.0 { p.min(q) } else { p.max(q) };

    Some(PathIntersection {
        obstacle: obstacle.detectable_id(),
        distance,
        center: obstacle.position(),
    })
}

/// 球形障害物回避
#[derive(Debug, Clone, PartialEq)]
pub struct ObstacleAvoidance {
    /// 予測時間（この時間内に衝突する障害物を回避対象とする）
    pub min_time_to_collision: f64,
    /// 前方向への付加力の割合
    pub avoidance_force_factor: f64,
}

impl Default for ObstacleAvoidance {
    fn default() -> Self {
        Self {
            min_time_to_collision: 2.0,
            avoidance_force_factor: 0.75,
        }
    }
}

impl ObstacleAvoidance {
    /// 最も近い衝突候補
    pub fn nearest_threat<'a, D, I>(&self, vehicle: &Vehicle, obstacles: I) -> Option<PathIntersection>
    where
        D: IDetectable + 'a,
        I: IntoIterator<Item = &'a D>,
    {
        let horizon = self.min_time_to_collision.max(0.0) * vehicle.speed();
        obstacles
            .into_iter()
            .filter_map(|obstacle| find_next_intersection_with_sphere(vehicle, obstacle))
            .filter(|intersection| intersection.distance < horizon)
            .min_by(|a, b| {
                a.distance
                    .total_cmp(&b.distance)
                    .then(a.obstacle.cmp(&b.obstacle))
            })
    }

    /// 回避の操舵力
    ///
    /// 障害物中心から自分への方向の、前方向に垂直な成分を最大操舵力に
    /// 正規化し、前方向へのバイアスを加えます。前方向との内積は常に非負です。
    pub fn compute<'a, D, I>(&self, vehicle: &Vehicle, obstacles: I) -> DVec3
    where
        D: IDetectable + 'a,
        I: IntoIterator<Item = &'a D>,
    {
        let Some(threat) = self.nearest_threat(vehicle, obstacles) else {
            return DVec3::ZERO;
        };

        let forward = vehicle.forward();
        let away = vehicle.position() - threat.center;
        let lateral = math_utils::perpendicular_component(away, forward);
        let direction = if lateral.length_squared() > EPSILON * EPSILON {
            lateral.normalize()
        } else {
            // 中心に正対している場合は側方へ
            vehicle.side()
        };

        let max_force = vehicle.max_force();
        direction * max_force + forward * max_force * self.avoidance_force_factor.max(0.0)
    }
}

/// 球形障害物からの反発（後処理）
///
/// 望む速度で`estimation_time`秒進んだ将来位置を基準に、各障害物からの反発ベクトルを
/// 平均します。将来の移動経路と交差する障害物は検知数倍で重み付けします。
/// 反発方向へ向かっている場合は、望む速度を反発ベクトルを法線とする面で反射します。
#[derive(Debug, Clone, PartialEq)]
pub struct ObstacleRepulsion {
    /// 将来位置の予測時間（秒）
    pub estimation_time: f64,
}

impl Default for ObstacleRepulsion {
    fn default() -> Self {
        Self { estimation_time: 2.0 }
    }
}

impl ObstacleRepulsion {
    pub fn compute<'a, D, I>(&self, vehicle: &Vehicle, obstacles: I) -> DVec3
    where
        D: IDetectable + 'a,
        I: IntoIterator<Item = &'a D>,
    {
        let obstacles: Vec<&D> = obstacles.into_iter().collect();
        if obstacles.is_empty() {
            return DVec3::ZERO;
        }

        let position = vehicle.position();
        let future_position = vehicle.predict_future_desired_position(self.estimation_time.max(0.0));
        let movement = future_position - position;
        let movement_length = movement.length();
        let count = obstacles.len() as f64;

        let mut avoidance = DVec3::ZERO;
        for obstacle in &obstacles {
            let combined_radius = vehicle.radius() + obstacle.radius();
            let on_path = movement_length > EPSILON
                && math_utils::point_to_segment_distance(
                    obstacle.position(),
                    position,
                    future_position,
                    movement / movement_length,
                    movement_length,
                )
                .distance
                    <= combined_radius;
            let multiplier = if on_path { count } else { 1.0 };

            let distance_future_squared = (future_position - obstacle.position()).length_squared();
            if distance_future_squared <= EPSILON {
                continue;
            }
            avoidance += (position - obstacle.position()) * multiplier / distance_future_squared;
        }
        avoidance /= count;

        let Some(normal) = avoidance.try_normalize() else {
            return DVec3::ZERO;
        };
        let desired = vehicle.desired_velocity();
        let approach = desired.dot(normal);
        if approach >= 0.0 {
            return DVec3::ZERO;
        }
        desired - normal * (2.0 * approach)
    }
}
