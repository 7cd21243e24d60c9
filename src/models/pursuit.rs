use glam::DVec3;

use crate::models::{
    common::{DetectableId, EPSILON, math_utils},
    traits::IDetectable,
    vehicle::Vehicle,
};

/// 方向分類のしきい値（約45度）
const BUCKET_THRESHOLD: f64 = 0.707;

/// 追跡時間係数の表
///
/// 行は相手の位置（前方/側方/後方）、列は相手の進行方向
/// （平行/直交/反平行）に対応します。
const TIME_FACTOR_TABLE: [[f64; 3]; 3] = [
    // 前方: 平行, 直交, 反平行
    [4.0, 1.8, 0.85],
    // 側方
    [1.0, 0.8, 4.0],
    // 後方
    [0.5, 2.0, 2.0],
];

/// 分類結果から時間係数を引く
///
/// # 引数
///
/// * `forwardness` - 相手の位置の分類（+1: 前方, 0: 側方, -1: 後方）
/// * `parallelness` - 相手の向きの分類（+1: 平行, 0: 直交, -1: 反平行）
pub fn time_factor(forwardness: i8, parallelness: i8) -> f64 {
    let row = (1 - forwardness.clamp(-1, 1)) as usize;
    let column = (1 - parallelness.clamp(-1, 1)) as usize;
    TIME_FACTOR_TABLE[row][column]
}

/// 迎撃予測の結果
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Intercept {
    /// 相手の位置の分類
    pub forwardness: i8,
    /// 相手の向きの分類
    pub parallelness: i8,
    /// 時間係数
    pub time_factor: f64,
    /// 予測時間（秒）
    pub intercept_time: f64,
    /// 予測位置
    pub target: DVec3,
    /// 現在距離
    pub distance: f64,
}

/// 迎撃点の予測
///
/// 相手の相対位置と進行方向を9通りに分類して時間係数を選び、
/// `min(最大予測時間, 距離 / 自速度 × 係数)`後の相手の予測位置を求めます。
/// 自速度がゼロの場合は最大予測時間を使用します。
pub fn predict_intercept<D: IDetectable + ?Sized>(
    pursuer: &Vehicle,
    quarry: &D,
    max_prediction_time: f64,
) -> Intercept {
    let offset = quarry.position() - pursuer.position();
    let distance = offset.length();
    let unit_offset = if distance > EPSILON { offset / distance } else { DVec3::ZERO };

    let parallelness_value = pursuer.forward().dot(quarry.forward());
    let forwardness_value = pursuer.forward().dot(unit_offset);
    let forwardness = math_utils::interval_comparison(forwardness_value, -BUCKET_THRESHOLD, BUCKET_THRESHOLD);
    let parallelness = math_utils::interval_comparison(parallelness_value, -BUCKET_THRESHOLD, BUCKET_THRESHOLD);
    let factor = time_factor(forwardness, parallelness);

    let max_prediction_time = max_prediction_time.max(0.0);
    let intercept_time = if pursuer.speed() > EPSILON {
        (distance / pursuer.speed() * factor).min(max_prediction_time)
    } else {
        max_prediction_time
    };

    Intercept {
        forwardness,
        parallelness,
        time_factor: factor,
        intercept_time,
        target: quarry.predict_future_position(intercept_time),
        distance,
    }
}

/// 追跡行動
#[derive(Debug, Clone, PartialEq)]
pub struct Pursuit {
    /// 追跡対象
    pub quarry: DetectableId,
    /// 接触とみなす余裕距離（メートル）
    pub acceptable_distance: f64,
    /// 最大予測時間（秒）
    pub max_prediction_time: f64,
    /// 減速開始距離（Noneの場合は減速しない）
    pub slowing_distance: Option<f64>,
}

impl Pursuit {
    pub fn new(quarry: DetectableId) -> Self {
        Self {
            quarry,
            acceptable_distance: 0.0,
            max_prediction_time: 5.0,
            slowing_distance: None,
        }
    }

    /// 追跡の操舵力
    ///
    /// 十分に接近している場合はゼロを返します。
    pub fn compute<D: IDetectable + ?Sized>(&self, vehicle: &Vehicle, quarry: &D) -> DVec3 {
        let distance = vehicle.position().distance(quarry.position());
        let contact = vehicle.radius() + quarry.radius() + self.acceptable_distance.max(0.0);
        if distance <= contact {
            return DVec3::ZERO;
        }

        let intercept = predict_intercept(vehicle, quarry, self.max_prediction_time);
        let force = vehicle.seek_vector(intercept.target, false);
        match self.slowing_distance {
            Some(slowing) if slowing > EPSILON && distance - contact < slowing => {
                force * ((distance - contact) / slowing)
            }
            _ => force,
        }
    }
}

/// 回避（逃走）行動
#[derive(Debug, Clone, PartialEq)]
pub struct Evasion {
    /// 脅威の候補
    pub menaces: Vec<DetectableId>,
    /// この距離より近い脅威から逃げる（メートル）
    pub safety_distance: f64,
    /// 予測時間の上限（秒）
    pub prediction_time: f64,
}

impl Evasion {
    pub fn new(menaces: Vec<DetectableId>) -> Self {
        Self {
            menaces,
            safety_distance: 2.0,
            prediction_time: 1.0,
        }
    }

    /// 安全距離内で最も近い脅威
    pub fn nearest_menace<'a, D: IDetectable>(&self, vehicle: &Vehicle, candidates: &'a [D]) -> Option<&'a D> {
        let safety_squared = self.safety_distance * self.safety_distance;
        candidates
            .iter()
            .map(|menace| (menace, menace.position().distance_squared(vehicle.position())))
            .filter(|(_, distance_squared)| *distance_squared <= safety_squared)
            .min_by(|a, b| a.1.total_cmp(&b.1))
            .map(|(menace, _)| menace)
    }

    /// 脅威の予測位置から離れる操舵力
    pub fn compute<D: IDetectable + ?Sized>(&self, vehicle: &Vehicle, menace: &D) -> DVec3 {
        let safety_squared = self.safety_distance * self.safety_distance;
        if vehicle.position().distance_squared(menace.position()) > safety_squared {
            return DVec3::ZERO;
        }
        let intercept = predict_intercept(vehicle, menace, self.prediction_time);
        vehicle.position() - intercept.target
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{
        common::{DetectableKind, vec3},
        detectable::DetectableObject,
    };

    fn moving_object(id: u32, position: DVec3, velocity: DVec3) -> DetectableObject {
        let mut object = DetectableObject::new(DetectableId(id), DetectableKind::Vehicle, position, 0.5);
        object.velocity = velocity;
        object.forward = velocity.normalize_or_zero();
        object
    }

    fn pursuer(position: DVec3, forward: DVec3, speed: f64) -> Vehicle {
        let mut vehicle = Vehicle::new(DetectableId(1), "pursuer".to_string(), position, forward);
        vehicle.set_max_speed(10.0);
        vehicle.set_speed(speed);
        vehicle
    }

    #[test]
    fn test_time_factor_table() {
        assert_eq!(time_factor(1, 1), 4.0);
        assert_eq!(time_factor(1, 0), 1.8);
        assert_eq!(time_factor(1, -1), 0.85);
        assert_eq!(time_factor(0, 1), 1.0);
        assert_eq!(time_factor(0, 0), 0.8);
        assert_eq!(time_factor(0, -1), 4.0);
        assert_eq!(time_factor(-1, 1), 0.5);
        assert_eq!(time_factor(-1, 0), 2.0);
        assert_eq!(time_factor(-1, -1), 2.0);
    }

    #[test]
    fn test_pursuer_behind_parallel_quarry_aims_ahead_of_it() {
        let vehicle = pursuer(DVec3::ZERO, DVec3::Z, 2.0);
        let quarry = moving_object(2, vec3(0.0, 0.0, 10.0), vec3(0.0, 0.0, 1.0));
        let intercept = predict_intercept(&vehicle, &quarry, 100.0);
        // 相手は前方かつ同じ向き
        assert_eq!((intercept.forwardness, intercept.parallelness), (1, 1));
        assert_eq!(intercept.time_factor, 4.0);
        assert!((intercept.intercept_time - 20.0).abs() < 1e-9);
        assert!(intercept.target.z > quarry.position.z);

        let force = Pursuit::new(DetectableId(2)).compute(&vehicle, &quarry);
        assert!(force.dot(DVec3::Z) > 0.0);
    }

    #[test]
    fn test_quarry_behind_parallel() {
        let vehicle = pursuer(DVec3::ZERO, DVec3::Z, 2.0);
        let quarry = moving_object(2, vec3(0.0, 0.0, -10.0), vec3(0.0, 0.0, 1.0));
        let intercept = predict_intercept(&vehicle, &quarry, 100.0);
        assert_eq!(intercept.time_factor, 0.5);
        assert!((intercept.intercept_time - 2.5).abs() < 1e-9);
    }

    #[test]
    fn test_prediction_time_is_capped() {
        let vehicle = pursuer(DVec3::ZERO, DVec3::Z, 0.0);
        let quarry = moving_object(2, vec3(0.0, 0.0, 10.0), vec3(1.0, 0.0, 0.0));
        let intercept = predict_intercept(&vehicle, &quarry, 3.0);
        assert_eq!(intercept.intercept_time, 3.0);
        assert!((intercept.target - vec3(3.0, 0.0, 10.0)).length() < 1e-12);
    }

    #[test]
    fn test_no_force_when_close_enough() {
        let vehicle = pursuer(DVec3::ZERO, DVec3::Z, 1.0);
        let quarry = moving_object(2, vec3(0.0, 0.0, 1.5), DVec3::Z);
        let mut pursuit = Pursuit::new(DetectableId(2));
        assert_ne!(pursuit.compute(&vehicle, &quarry), DVec3::ZERO);
        pursuit.acceptable_distance = 0.5;
        assert_eq!(pursuit.compute(&vehicle, &quarry), DVec3::ZERO);
    }

    #[test]
    fn test_slowing_distance_scales_force() {
        let vehicle = pursuer(DVec3::ZERO, DVec3::Z, 1.0);
        let quarry = moving_object(2, vec3(0.0, 0.0, 3.0), DVec3::ZERO);
        let mut pursuit = Pursuit::new(DetectableId(2));
        let full = pursuit.compute(&vehicle, &quarry);
        pursuit.slowing_distance = Some(4.0);
        let slowed = pursuit.compute(&vehicle, &quarry);
        assert!((slowed.length() - full.length() * 0.5).abs() < 1e-9);
    }

    #[test]
    fn test_evasion_flees_from_menace() {
        let vehicle = pursuer(DVec3::ZERO, DVec3::Z, 1.0);
        let menace = moving_object(2, vec3(1.0, 0.0, 0.0), vec3(-1.0, 0.0, 0.0));
        let evasion = Evasion::new(vec![DetectableId(2)]);
        let force = evasion.compute(&vehicle, &menace);
        assert!(force.x < 0.0);

        let far = moving_object(3, vec3(10.0, 0.0, 0.0), DVec3::ZERO);
        assert_eq!(evasion.compute(&vehicle, &far), DVec3::ZERO);

        let candidates = vec![far, menace];
        let nearest = evasion.nearest_menace(&vehicle, &candidates);
        assert_eq!(nearest.map(|m| m.id), Some(DetectableId(2)));
    }
}
