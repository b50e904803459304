// 该文件是 Yuxian （鱼鲜） 项目的一部分。
// src/task.rs - 任务
//
// 本文件根据 Apache 许可证第 2.0 版（以下简称“许可证”）授权使用；
// 除非遵守该许可证条款，否则您不得使用本文件。
// 您可通过以下网址获取许可证副本：
// http://www.apache.org/licenses/LICENSE-2.0
// 除非适用法律要求或书面同意，根据本许可协议分发的软件均按“原样”提供，
// 不附带任何形式的明示或暗示的保证或条件。
// 有关许可权限与限制的具体条款，请参阅本许可协议。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, Wareless Group

use std::time::{Duration, Instant};

use tracing::{info, warn};

use crate::{model::Model, output::Render};

/// 预热轮次，不计入平均耗时
const WARMUP_ROUNDS: usize = 2;
pub const DEFAULT_REPEAT_TIMES: usize = 1000;

pub trait Task<I, M, O>: Sized {
  type Error;
  fn run_task(self, input: I, model: M, output: O) -> Result<(), Self::Error>;
}

/// 对每个输入帧推理一次并输出
pub struct OneShotTask;

impl<
  F,
  D,
  ME: std::error::Error + Sync + Send + 'static,
  RE: std::error::Error + Sync + Send + 'static,
  I: Iterator<Item = F>,
  M: Model<Input = F, Output = D, Error = ME>,
  O: Render<F, D, Error = RE>,
> Task<I, M, O> for OneShotTask
{
  type Error = anyhow::Error;

  fn run_task(self, input: I, model: M, output: O) -> Result<(), Self::Error> {
    info!("开始任务...");
    let mut frames = 0usize;
    for frame in input {
      frames += 1;
      let now = Instant::now();
      let result = model.infer(&frame)?;
      let elapsed = now.elapsed();
      info!("({})推理完成，耗时: {:.2?}", frames, elapsed);
      output.render_result(&frame, &result)?;
      info!("({})渲染完成，耗时: {:.2?}", frames, now.elapsed());
    }

    if frames == 0 {
      return Err(anyhow::anyhow!("没有输入帧"));
    }
    info!("任务完成，共处理 {} 帧", frames);
    Ok(())
  }
}

/// 对第一帧重复推理，统计平均耗时
pub struct RepeatShotTask {
  repeat_times: usize,
}

impl Default for RepeatShotTask {
  fn default() -> Self {
    Self {
      repeat_times: DEFAULT_REPEAT_TIMES,
    }
  }
}

impl RepeatShotTask {
  pub fn with_repeat_times(mut self, repeat_times: usize) -> Self {
    self.repeat_times = repeat_times.max(1);
    self
  }
}

impl<
  F,
  D,
  ME: std::error::Error + Sync + Send + 'static,
  RE: std::error::Error + Sync + Send + 'static,
  I: Iterator<Item = F>,
  M: Model<Input = F, Output = D, Error = ME>,
  O: Render<F, D, Error = RE>,
> Task<I, M, O> for RepeatShotTask
{
  type Error = anyhow::Error;

  fn run_task(self, mut input: I, model: M, output: O) -> Result<(), Self::Error> {
    info!("开始任务...");
    let frame = input.next().ok_or_else(|| anyhow::anyhow!("没有输入帧"))?;
    info!("输入帧获取成功，开始推理...");
    let mut times = Vec::with_capacity(self.repeat_times);
    for i in 0..self.repeat_times {
      let now = Instant::now();
      let result = model.infer(&frame)?;
      let elapsed = now.elapsed();
      info!("({})推理完成，耗时: {:.2?}", i, elapsed);
      output.render_result(&frame, &result)?;
      times.push(elapsed);
    }

    let measured = if times.len() > WARMUP_ROUNDS {
      &times[WARMUP_ROUNDS..]
    } else {
      &times[..]
    };
    warn!(
      "平均推理时间: {:.2?}",
      measured.iter().sum::<Duration>() / measured.len() as u32
    );

    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use std::{cell::Cell, convert::Infallible};

  use super::*;

  struct Doubler;

  impl Model for Doubler {
    type Input = u32;
    type Output = u32;
    type Error = Infallible;

    fn infer(&self, input: &u32) -> Result<u32, Infallible> {
      Ok(input * 2)
    }
  }

  #[derive(Default)]
  struct Collect {
    sum: Cell<u32>,
    calls: Cell<usize>,
  }

  impl Render<u32, u32> for &Collect {
    type Error = Infallible;

    fn render_result(&self, _frame: &u32, result: &u32) -> Result<(), Infallible> {
      self.sum.set(self.sum.get() + result);
      self.calls.set(self.calls.get() + 1);
      Ok(())
    }
  }

  #[test]
  fn test_one_shot_processes_every_frame() {
    let collect = Collect::default();
    OneShotTask.run_task([1u32, 2, 3].into_iter(), Doubler, &collect).unwrap();
    assert_eq!(collect.sum.get(), 12);
    assert_eq!(collect.calls.get(), 3);
  }

  #[test]
  fn test_one_shot_without_input_fails() {
    let collect = Collect::default();
    assert!(OneShotTask.run_task(std::iter::empty::<u32>(), Doubler, &collect).is_err());
  }

  #[test]
  fn test_repeat_shot_reuses_first_frame() {
    let collect = Collect::default();
    RepeatShotTask::default()
      .with_repeat_times(5)
      .run_task([4u32, 100].into_iter(), Doubler, &collect)
      .unwrap();
    assert_eq!(collect.calls.get(), 5);
    assert_eq!(collect.sum.get(), 40);
  }
}
