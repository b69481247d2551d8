//! Copyright (c) 2026, Kirky.X
//!
//! MIT License
//!
//! 过期时间计算器
//!
//! 根据反馈历史计算下一次软过期时长。所有策略都是纯函数，不做任何I/O，
//! 相同的输入总是得到相同的输出。
//!
//! # 策略
//!
//! - [`SimpleExpireCalculator`]: 固定±30秒
//! - [`ProportionExpireCalculator`]: 未变化×1.5，变化×0.5
//! - [`DerivativeExpireCalculator`]: 按 `2^Dn` 缩放并修正±15秒，超过3600秒回落到600秒
//! - [`IntegrateDerivativeExpireCalculator`]: 缩放量按窗口内的反馈次数平滑，只有10秒下限

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

use crate::constants::{DEFAULT_FIRST_EXPIRE_SECS, MAX_DERIVATIVE};
use crate::entity::{Feedback, FeedbackEntry};

/// 首次计算（无历史）时的过期时长
pub const FIRST_EXPIRE: Duration = Duration::from_secs(DEFAULT_FIRST_EXPIRE_SECS);

const SIMPLE_ADJUST: Duration = Duration::from_secs(30);
const SIMPLE_FLOOR: Duration = Duration::from_secs(5);
const DERIVATIVE_ADJUST_SECS: f64 = 15.0;
const DERIVATIVE_FLOOR_SECS: f64 = 10.0;
const DERIVATIVE_CEILING_SECS: f64 = 3600.0;
const DERIVATIVE_COOL_DOWN_SECS: f64 = 600.0;

/// 过期时间计算器
pub trait ExpireCalculator: Send + Sync {
    /// 计算下一次过期时长
    fn calculate(&self, feedback: &FeedbackEntry) -> Duration;
}

/// 计算器种类，用于配置
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CalculatorKind {
    Simple,
    Proportion,
    Derivative,
    #[default]
    IntegrateDerivative,
}

impl CalculatorKind {
    /// 构造对应的计算器
    pub fn build(self) -> Arc<dyn ExpireCalculator> {
        match self {
            CalculatorKind::Simple => Arc::new(SimpleExpireCalculator),
            CalculatorKind::Proportion => Arc::new(ProportionExpireCalculator),
            CalculatorKind::Derivative => Arc::new(DerivativeExpireCalculator),
            CalculatorKind::IntegrateDerivative => Arc::new(IntegrateDerivativeExpireCalculator),
        }
    }
}

impl std::str::FromStr for CalculatorKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "simple" => Ok(CalculatorKind::Simple),
            "proportion" => Ok(CalculatorKind::Proportion),
            "derivative" => Ok(CalculatorKind::Derivative),
            "integrate_derivative" => Ok(CalculatorKind::IntegrateDerivative),
            other => Err(format!("未知的过期计算器: {}", other)),
        }
    }
}

/// 固定步长
#[derive(Debug, Clone, Copy, Default)]
pub struct SimpleExpireCalculator;

impl ExpireCalculator for SimpleExpireCalculator {
    fn calculate(&self, feedback: &FeedbackEntry) -> Duration {
        if feedback.is_empty() {
            return FIRST_EXPIRE;
        }
        let next = match feedback.current_feedback {
            Feedback::Unchanged => feedback.expire_time.saturating_add(SIMPLE_ADJUST),
            Feedback::Changed => feedback.expire_time.saturating_sub(SIMPLE_ADJUST),
        };
        next.max(SIMPLE_FLOOR)
    }
}

/// 比例缩放
#[derive(Debug, Clone, Copy, Default)]
pub struct ProportionExpireCalculator;

impl ExpireCalculator for ProportionExpireCalculator {
    fn calculate(&self, feedback: &FeedbackEntry) -> Duration {
        if feedback.is_empty() {
            return FIRST_EXPIRE;
        }
        match feedback.current_feedback {
            Feedback::Unchanged => feedback
                .expire_time
                .checked_mul(3)
                .map(|d| d / 2)
                .unwrap_or(Duration::MAX),
            Feedback::Changed => feedback.expire_time / 2,
        }
    }
}

/// 导数缩放
#[derive(Debug, Clone, Copy, Default)]
pub struct DerivativeExpireCalculator;

impl ExpireCalculator for DerivativeExpireCalculator {
    fn calculate(&self, feedback: &FeedbackEntry) -> Duration {
        if feedback.is_empty() {
            return FIRST_EXPIRE;
        }
        let dn = clamp_dn(feedback.dn());
        let expire = feedback.expire_time.as_secs_f64() * 2f64.powi(dn);
        let expire = adjust(expire, feedback.current_feedback);

        // 超过上限时回落而不是截断
        let expire = if expire < DERIVATIVE_FLOOR_SECS {
            DERIVATIVE_FLOOR_SECS
        } else if expire > DERIVATIVE_CEILING_SECS {
            DERIVATIVE_COOL_DOWN_SECS
        } else {
            expire
        };
        whole_seconds(expire)
    }
}

/// 积分平滑的导数缩放
///
/// 缩放方向与 [`DerivativeExpireCalculator`] 相反：连续变化时拉长，连续未变化时缩短。
/// 缩放量除以窗口内同方向的反馈次数。
#[derive(Debug, Clone, Copy, Default)]
pub struct IntegrateDerivativeExpireCalculator;

impl ExpireCalculator for IntegrateDerivativeExpireCalculator {
    fn calculate(&self, feedback: &FeedbackEntry) -> Duration {
        if feedback.is_empty() {
            return FIRST_EXPIRE;
        }
        let dn = clamp_dn(-feedback.dn());
        let expire = feedback.expire_time.as_secs_f64();
        let scaled = expire * 2f64.powi(dn);

        let diff = scaled - expire;
        let (unchanged, changed) = feedback.counts();
        let divisor = if diff > 0.0 { unchanged } else { changed }.max(1) as f64;
        let next = adjust(expire + diff / divisor, feedback.current_feedback);

        whole_seconds(next.max(DERIVATIVE_FLOOR_SECS))
    }
}

fn clamp_dn(dn: i32) -> i32 {
    dn.clamp(-MAX_DERIVATIVE, MAX_DERIVATIVE)
}

fn adjust(expire: f64, feedback: Feedback) -> f64 {
    match feedback {
        Feedback::Unchanged => expire + DERIVATIVE_ADJUST_SECS,
        Feedback::Changed => expire - DERIVATIVE_ADJUST_SECS,
    }
}

fn whole_seconds(secs: f64) -> Duration {
    if !secs.is_finite() || secs >= u64::MAX as f64 {
        return Duration::from_secs(u64::MAX);
    }
    Duration::from_secs(secs.max(0.0) as u64)
}
