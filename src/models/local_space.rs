use glam::DVec3;

use crate::models::common::EPSILON;

/// ローカル座標系
///
/// 位置と正規直交基底（forward/side/up）を保持します。右手系で
/// side = forward × up、up = side × forward の関係を維持します。
/// ローカル座標のx軸はside、y軸はup、z軸はforwardに対応します。
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LocalSpace {
    pub position: DVec3,
    pub forward: DVec3,
    pub side: DVec3,
    pub up: DVec3,
}

impl Default for LocalSpace {
    fn default() -> Self {
        let mut space = Self {
            position: DVec3::ZERO,
            forward: DVec3::Z,
            side: DVec3::ZERO,
            up: DVec3::Y,
        };
        space.set_unit_side_from_forward_and_up();
        space
    }
}

impl LocalSpace {
    /// 指定位置・向きでローカル座標系を作成
    pub fn new(position: DVec3, forward: DVec3) -> Self {
        let mut space = Self {
            position,
            ..Default::default()
        };
        space.regenerate_orthonormal_basis(forward);
        space
    }

    /// 基底を初期状態（forward=+Z, up=+Y）に戻す
    pub fn reset_orientation(&mut self) {
        self.forward = DVec3::Z;
        self.up = DVec3::Y;
        self.set_unit_side_from_forward_and_up();
    }

    /// forwardとupからsideを再計算
    fn set_unit_side_from_forward_and_up(&mut self) {
        let side = self.forward.cross(self.up);
        self.side = if side.length_squared() > EPSILON {
            side.normalize()
        } else {
            // forwardとupが平行な場合は別の参照軸を使う
            let reference = if self.forward.x.abs() < 0.9 { DVec3::X } else { DVec3::Z };
            self.forward.cross(reference).normalize_or_zero()
        };
    }

    /// 単位長のforwardから基底を再生成
    pub fn regenerate_orthonormal_basis_unit_forward(&mut self, new_unit_forward: DVec3) {
        self.forward = new_unit_forward;
        self.set_unit_side_from_forward_and_up();
        self.up = self.side.cross(self.forward);
    }

    /// 任意長のforwardから基底を再生成（長さ0の場合は何もしない）
    pub fn regenerate_orthonormal_basis(&mut self, new_forward: DVec3) {
        let unit = new_forward.normalize_or_zero();
        if unit != DVec3::ZERO {
            self.regenerate_orthonormal_basis_unit_forward(unit);
        }
    }

    /// ワールド方向ベクトルをローカル方向に変換
    pub fn localize_direction(&self, global_direction: DVec3) -> DVec3 {
        DVec3::new(
            global_direction.dot(self.side),
            global_direction.dot(self.up),
            global_direction.dot(self.forward),
        )
    }

    /// ワールド座標をローカル座標に変換
    pub fn localize_position(&self, global_position: DVec3) -> DVec3 {
        self.localize_direction(global_position - self.position)
    }

    /// ローカル方向ベクトルをワールド方向に変換
    pub fn globalize_direction(&self, local_direction: DVec3) -> DVec3 {
        self.side * local_direction.x + self.up * local_direction.y + self.forward * local_direction.z
    }

    /// ローカル座標をワールド座標に変換
    pub fn globalize_position(&self, local_position: DVec3) -> DVec3 {
        self.position + self.globalize_direction(local_position)
    }

    /// 基底が正規直交かどうか
    pub fn is_orthonormal(&self, tolerance: f64) -> bool {
        (self.forward.length() - 1.0).abs() < tolerance
            && (self.side.length() - 1.0).abs() < tolerance
            && (self.up.length() - 1.0).abs() < tolerance
            && self.forward.dot(self.side).abs() < tolerance
            && self.forward.dot(self.up).abs() < tolerance
            && self.side.dot(self.up).abs() < tolerance
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_basis_is_right_handed() {
        let space = LocalSpace::default();
        assert!(space.is_orthonormal(1e-12));
        assert_eq!(space.side, space.forward.cross(space.up));
    }

    #[test]
    fn test_regenerate_keeps_orthonormal() {
        let mut space = LocalSpace::default();
        space.regenerate_orthonormal_basis(DVec3::new(1.0, 0.5, -2.0));
        assert!(space.is_orthonormal(1e-9));
        assert!((space.forward - DVec3::new(1.0, 0.5, -2.0).normalize()).length() < 1e-12);
    }

    #[test]
    fn test_regenerate_with_forward_parallel_to_up() {
        let mut space = LocalSpace::default();
        space.regenerate_orthonormal_basis(DVec3::Y);
        assert!(space.is_orthonormal(1e-9));
    }

    #[test]
    fn test_zero_forward_is_ignored() {
        let mut space = LocalSpace::default();
        let before = space;
        space.regenerate_orthonormal_basis(DVec3::ZERO);
        assert_eq!(space, before);
    }

    #[test]
    fn test_localize_globalize_roundtrip() {
        let space = LocalSpace::new(DVec3::new(1.0, 2.0, 3.0), DVec3::new(1.0, 0.0, 1.0));
        let point = DVec3::new(-4.0, 0.5, 7.0);
        let local = space.localize_position(point);
        assert!((space.globalize_position(local) - point).length() < 1e-9);
        // 前方の点はローカルz軸上に乗る
        let ahead = space.position + space.forward * 5.0;
        let local_ahead = space.localize_position(ahead);
        assert!((local_ahead.z - 5.0).abs() < 1e-9);
        assert!(local_ahead.x.abs() < 1e-9 && local_ahead.y.abs() < 1e-9);
    }
}
