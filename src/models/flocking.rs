//! 群れ行動（分離・整列・結合・速度合わせ）
//!
//! いずれもレーダー周期ごとに作成された近傍リストを入力とし、
//! 単位ベクトル（近傍がいなければゼロ）を返します。力の大きさは重みで決まります。

use glam::DVec3;

use crate::models::{common::EPSILON, detectable::DetectableObject, vehicle::Vehicle};

/// 近傍の集計結果から方向を求める共通処理
fn steer_from_sum(sum: DVec3, count: usize, own: DVec3) -> DVec3 {
    if count == 0 {
        return DVec3::ZERO;
    }
    (sum / count as f64 - own).normalize_or_zero()
}

/// 分離: 近いほど強く近傍から離れる
pub fn separation<'a, I>(vehicle: &Vehicle, neighbors: I) -> DVec3
where
    I: IntoIterator<Item = &'a DetectableObject>,
{
    let mut steering = DVec3::ZERO;
    let mut count = 0;
    for neighbor in neighbors {
        if neighbor.id == vehicle.id {
            continue;
        }
        let offset = neighbor.position - vehicle.position();
        let distance_squared = offset.length_squared();
        if distance_squared <= EPSILON {
            // 同一地点の近傍は方向が定まらない
            continue;
        }
        steering -= offset / distance_squared;
        count += 1;
    }
    steer_from_sum(steering, count, DVec3::ZERO)
}

/// 整列: 近傍の平均的な向きに合わせる
pub fn alignment<'a, I>(vehicle: &Vehicle, neighbors: I) -> DVec3
where
    I: IntoIterator<Item = &'a DetectableObject>,
{
    let (sum, count) = neighbors
        .into_iter()
        .filter(|neighbor| neighbor.id != vehicle.id)
        .fold((DVec3::ZERO, 0), |(sum, count), neighbor| (sum + neighbor.forward, count + 1));
    steer_from_sum(sum, count, vehicle.forward())
}

/// 結合: 近傍の重心に向かう
pub fn cohesion<'a, I>(vehicle: &Vehicle, neighbors: I) -> DVec3
where
    I: IntoIterator<Item = &'a DetectableObject>,
{
    let (sum, count) = neighbors
        .into_iter()
        .filter(|neighbor| neighbor.id != vehicle.id)
        .fold((DVec3::ZERO, 0), |(sum, count), neighbor| (sum + neighbor.position, count + 1));
    steer_from_sum(sum, count, vehicle.position())
}

/// 速度合わせ: 近傍の平均速度に合わせる
pub fn matching_velocity<'a, I>(vehicle: &Vehicle, neighbors: I) -> DVec3
where
    I: IntoIterator<Item = &'a DetectableObject>,
{
    let (sum, count) = neighbors
        .into_iter()
        .filter(|neighbor| neighbor.id != vehicle.id)
        .fold((DVec3::ZERO, 0), |(sum, count), neighbor| (sum + neighbor.velocity, count + 1));
    steer_from_sum(sum, count, vehicle.velocity())
}
