use glam::DVec3;

use crate::models::{
    common::{DetectableId, DetectableKind},
    traits::IDetectable,
    vehicle::{MIN_RADIUS, VehicleState},
};

/// 空間インデックスに登録される検知可能オブジェクト
///
/// ビークルの場合は各ステップ終了時に位置・速度・向きが更新されます。
/// 力の計算中はこの値が読み取り専用のスナップショットとして使われます。
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DetectableObject {
    pub id: DetectableId,
    pub kind: DetectableKind,
    pub position: DVec3,
    pub velocity: DVec3,
    pub forward: DVec3,
    pub enabled: bool,
    radius: f64,
    squared_radius: f64,
}

impl DetectableObject {
    /// 新しいオブジェクトを作成（半径は最小値でクランプ）
    pub fn new(id: DetectableId, kind: DetectableKind, position: DVec3, radius: f64) -> Self {
        let radius = radius.max(MIN_RADIUS);
        Self {
            id,
            kind,
            position,
            velocity: DVec3::ZERO,
            forward: DVec3::ZERO,
            enabled: true,
            radius,
            squared_radius: radius * radius,
        }
    }

    /// ビークルのスナップショットから作成
    pub fn from_vehicle_state(state: &VehicleState) -> Self {
        let mut object = Self::new(state.id, DetectableKind::Vehicle, state.position, state.radius);
        object.apply_vehicle_state(state);
        object
    }

    /// ビークルのスナップショットで運動状態を更新
    pub fn apply_vehicle_state(&mut self, state: &VehicleState) {
        self.position = state.position;
        self.velocity = state.velocity;
        self.forward = state.forward;
        self.enabled = state.enabled;
        self.set_radius(state.radius);
    }

    pub fn set_radius(&mut self, radius: f64) {
        self.radius = radius.max(MIN_RADIUS);
        self.squared_radius = self.radius * self.radius;
    }

    pub fn is_vehicle(&self) -> bool {
        self.kind == DetectableKind::Vehicle
    }
}

impl IDetectable for DetectableObject {
    fn detectable_id(&self) -> DetectableId {
        self.id
    }

    fn kind(&self) -> DetectableKind {
        self.kind
    }

    fn position(&self) -> DVec3 {
        self.position
    }

    fn radius(&self) -> f64 {
        self.radius
    }

    fn squared_radius(&self) -> f64 {
        self.squared_radius
    }

    fn velocity(&self) -> DVec3 {
        self.velocity
    }

    fn forward(&self) -> DVec3 {
        self.forward
    }
}

/// 静止した球形障害物
#[derive(Debug, Clone, PartialEq)]
pub struct SphericalObstacle {
    pub id: DetectableId,
    pub name: String,
    pub center: DVec3,
    radius: f64,
}

impl SphericalObstacle {
    pub fn new(id: DetectableId, name: String, center: DVec3, radius: f64) -> Self {
        Self {
            id,
            name,
            center,
            radius: radius.max(MIN_RADIUS),
        }
    }

    /// インデックス登録用のエントリ
    pub fn to_detectable(&self) -> DetectableObject {
        DetectableObject::new(self.id, DetectableKind::Obstacle, self.center, self.radius)
    }
}

impl IDetectable for SphericalObstacle {
    fn detectable_id(&self) -> DetectableId {
        self.id
    }

    fn kind(&self) -> DetectableKind {
        DetectableKind::Obstacle
    }

    fn position(&self) -> DVec3 {
        self.center
    }

    fn radius(&self) -> f64 {
        self.radius
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::common::vec3;

    #[test]
    fn test_static_object_predicts_current_position() {
        let obstacle = SphericalObstacle::new(DetectableId(5), "rock".to_string(), vec3(1.0, 2.0, 3.0), 2.0);
        assert_eq!(obstacle.predict_future_position(10.0), vec3(1.0, 2.0, 3.0));
        let entry = obstacle.to_detectable();
        assert_eq!(entry.kind, DetectableKind::Obstacle);
        assert_eq!(entry.squared_radius(), 4.0);
    }

    #[test]
    fn test_radius_is_clamped() {
        let object = DetectableObject::new(DetectableId(1), DetectableKind::Obstacle, DVec3::ZERO, -1.0);
        assert_eq!(object.radius(), MIN_RADIUS);
    }

    #[test]
    fn test_from_vehicle_state_predicts_motion() {
        let state = VehicleState {
            id: DetectableId(2),
            position: DVec3::ZERO,
            forward: DVec3::X,
            velocity: vec3(2.0, 0.0, 0.0),
            speed: 2.0,
            radius: 0.5,
            enabled: true,
        };
        let object = DetectableObject::from_vehicle_state(&state);
        assert!(object.is_vehicle());
        assert_eq!(object.predict_future_position(1.5), vec3(3.0, 0.0, 0.0));
        assert_eq!(object.speed(), 2.0);
    }
}
