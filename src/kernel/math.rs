use std::{
    f64::consts::PI,
    time::{Duration, Instant},
};

use chrono::{Local, Timelike};
use log::{debug, info, warn};
use rand::Rng;

use super::KernelArgs;
use crate::{
    config::SciVersion,
    error::VmResult,
    heap::Register,
    pmachine::{ExitReason, PMachine},
};

const TICK_DURATION: u32 = 1_000_000_000u32 / 60;

pub(super) fn random(_pm: &mut PMachine<'_>, args: &KernelArgs) -> VmResult<Register> {
    let (min, max) = (args.i16(0), args.i16(1));
    info!("Kernel> Random {}..={}", min, max);
    if min > max {
        warn!("Random with empty range {min}..={max}");
        return Ok(Register::value(min));
    }
    Ok(Register::value(rand::thread_rng().gen_range(min..=max)))
}

pub(super) fn abs(_pm: &mut PMachine<'_>, args: &KernelArgs) -> VmResult<Register> {
    Ok(Register::value(args.i16(0).wrapping_abs()))
}

pub(super) fn sqrt(_pm: &mut PMachine<'_>, args: &KernelArgs) -> VmResult<Register> {
    let v = (args.i16(0) as f64).abs();
    Ok(Register::value(v.sqrt() as i16))
}

/// Angle from (x1, y1) to (x2, y2) in degrees, 0 pointing up and growing clockwise.
/// SCI0 approximates it through grads.
pub fn angle_between(version: SciVersion, x1: i16, y1: i16, x2: i16, y2: i16) -> i16 {
    if version >= SciVersion::Sci1Ega {
        return atan2_degrees(x2 as i32 - x1 as i32, y1 as i32 - y2 as i32) as i16;
    }

    let mut x_rel = x2 as i32 - x1 as i32;
    let mut y_rel = y1 as i32 - y2 as i32;
    if y1 < y2 {
        y_rel = -y_rel;
    }
    if x2 < x1 {
        x_rel = -x_rel;
    }
    if x_rel == 0 && y_rel == 0 {
        return 0;
    }
    let mut angle = 100 * x_rel / (x_rel + y_rel);
    if y1 < y2 {
        angle = 200 - angle;
    }
    if x2 < x1 {
        angle = 400 - angle;
    }
    // grads to degrees: every tenth grad is merged with its neighbour
    angle -= (angle + 9) / 10;
    angle as i16
}

/// Integer atan2 measured clockwise from the y axis
fn atan2_degrees(y: i32, x: i32) -> i32 {
    if y < 0 {
        let a = atan2_degrees(-y, -x);
        return if a == 180 { 0 } else { 180 + a };
    }
    if x < 0 {
        return 90 + atan2_degrees(-x, y);
    }
    if y > x {
        90 - atan_first_octant(x, y)
    } else {
        atan_first_octant(y, x)
    }
}

fn atan_first_octant(y: i32, x: i32) -> i32 {
    if x == 0 {
        return 0;
    }
    let tan = 10000 * y / x;
    if tan >= 1000 {
        // 10000 * tan of 5, 10 .. 45 degrees, interpolated linearly between
        const TAN_TABLE: [i32; 9] = [875, 1763, 2679, 3640, 4663, 5774, 7002, 8391, 10000];
        let mut i = 1;
        while i < TAN_TABLE.len() - 1 && tan > TAN_TABLE[i] {
            i += 1;
        }
        let dist = TAN_TABLE[i] - TAN_TABLE[i - 1];
        let interp = (5 * (tan - TAN_TABLE[i - 1]) + dist / 2) / dist;
        5 * i as i32 + interp
    } else {
        // small angles are close enough to linear
        (57 * y + x / 2) / x
    }
}

pub(super) fn get_angle(pm: &mut PMachine<'_>, args: &KernelArgs) -> VmResult<Register> {
    let angle = angle_between(pm.config.version, args.i16(0), args.i16(1), args.i16(2), args.i16(3));
    debug!("Kernel> GetAngle {:?} = {}", args.as_slice(), angle);
    Ok(Register::value(angle))
}

pub(super) fn get_distance(_pm: &mut PMachine<'_>, args: &KernelArgs) -> VmResult<Register> {
    let x_rel = args.i16(0) as f64 - args.opt(2).map_or(0, |r| r.to_i16()) as f64;
    let mut y_rel = args.i16(1) as f64 - args.opt(3).map_or(0, |r| r.to_i16()) as f64;
    // an optional viewing angle stretches the y distance
    if let Some(perspective) = args.opt(4) {
        let cos = (perspective.to_i16() as f64 * PI / 180.0).cos();
        if cos.abs() > f64::EPSILON {
            y_rel /= cos;
        }
    }
    Ok(Register::value((x_rel * x_rel + y_rel * y_rel).sqrt() as i16))
}

fn radians(degrees: i16) -> f64 {
    degrees as f64 * PI / 180.0
}

pub(super) fn sin_mult(_pm: &mut PMachine<'_>, args: &KernelArgs) -> VmResult<Register> {
    let value = args.i16(1) as f64 * radians(args.i16(0)).sin();
    Ok(Register::value(value as i16))
}

pub(super) fn cos_mult(_pm: &mut PMachine<'_>, args: &KernelArgs) -> VmResult<Register> {
    let value = args.i16(1) as f64 * radians(args.i16(0)).cos();
    Ok(Register::value(value as i16))
}

fn divide(value: i16, divisor: f64) -> Register {
    if divisor.abs() < 0.0001 {
        warn!("Division by a vanishing sine or cosine");
        return Register::NULL;
    }
    Register::value((value as f64 / divisor) as i16)
}

pub(super) fn sin_div(_pm: &mut PMachine<'_>, args: &KernelArgs) -> VmResult<Register> {
    Ok(divide(args.i16(1), radians(args.i16(0)).sin()))
}

pub(super) fn cos_div(_pm: &mut PMachine<'_>, args: &KernelArgs) -> VmResult<Register> {
    Ok(divide(args.i16(1), radians(args.i16(0)).cos()))
}

/// ATan(x1, y1, x2, y2): the exact angle GetAngle approximates
pub(super) fn atan(_pm: &mut PMachine<'_>, args: &KernelArgs) -> VmResult<Register> {
    let dx = args.i16(2) as f64 - args.i16(0) as f64;
    let dy = args.i16(1) as f64 - args.i16(3) as f64;
    let degrees = dx.atan2(dy).to_degrees();
    let degrees = if degrees < 0.0 { degrees + 360.0 } else { degrees };
    Ok(Register::value(degrees.round() as i16 % 360))
}

pub(super) fn wait(pm: &mut PMachine<'_>, args: &KernelArgs) -> VmResult<Register> {
    let ticks = args.i16(0).max(0);
    info!("Kernel> Wait ticks: {:x}", ticks);
    if pm.config.throttle {
        let target = pm.last_wait_time + Duration::new(0, TICK_DURATION) * ticks as u32;
        if let Some(remaining) = target.checked_duration_since(Instant::now()) {
            std::thread::sleep(remaining);
        }
    }
    let t = Instant::now();
    let result = t.duration_since(pm.last_wait_time).as_nanos() / TICK_DURATION as u128;
    debug!("Time between wait {}", result);
    pm.last_wait_time = t;
    // the host gets a chance to present the frame and pump input
    pm.suspend(ExitReason::Wait, [Some(Register::value(ticks)), None]);
    Ok(Register::value(result.min(i16::MAX as u128) as i16))
}

pub(super) fn get_time(pm: &mut PMachine<'_>, args: &KernelArgs) -> VmResult<Register> {
    let mode = !args.is_empty();
    info!("Kernel> GetTime (system time?: {:?})", mode);

    if !mode {
        // Convert millis to ticks (60 ticks/sec)
        let ticks = pm.start_time.elapsed().as_millis() * 60 / 1000;
        // scripts only look at differences, so wrapping is harmless
        debug!("ticks = {} -> {}", ticks, ticks as i16);
        Ok(Register::value(ticks as i16))
    } else {
        let local = Local::now();
        let t = local.hour12().1 << 12 | local.minute() << 6 | local.second();
        debug!("time = {}", t);
        // exceeds i16 after 8 o'clock; consumers only compare it for changes
        Ok(Register::value(t as i16))
    }
}
