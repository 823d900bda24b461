//! Validated, flat step programs

use std::collections::HashMap;

use mp_core::StepRecord;
use tracing::debug;

use crate::error::{ProgramError, ProgramResult};
use crate::step::{Step, StepKind};

/// Loop-start bookkeeping produced while pairing
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoopBounds {
    /// Label used in logs: the loop id, or `loop_<index>`
    pub label: String,
    pub start_index: usize,
    /// Index of the step ending the body; exiting continues after it
    pub end_index: usize,
}

/// An immutable, validated list of steps
///
/// Building a program checks every jump target and pairs each loop start
/// with the step that closes it, so the interpreter never has to search
/// for loop boundaries at run time.
#[derive(Debug, Clone, Default)]
pub struct Program {
    steps: Vec<Step>,
    /// Keyed by loop-start index
    loops: HashMap<usize, LoopBounds>,
    /// Loop-end index to loop-start index
    loop_ends: HashMap<usize, usize>,
}

struct OpenLoop {
    start_index: usize,
    label: String,
    explicit_end: Option<usize>,
}

impl Program {
    pub fn new(steps: Vec<Step>) -> ProgramResult<Self> {
        let len = steps.len();
        for (index, step) in steps.iter().enumerate() {
            check_targets(index, step, len)?;
        }

        let (loops, loop_ends) = pair_loops(&steps)?;
        debug!("Built program: {} steps, {} loops", len, loops.len());

        Ok(Self {
            steps,
            loops,
            loop_ends,
        })
    }

    /// Convert serializer records and build a program from them
    pub fn from_records(records: &[StepRecord]) -> ProgramResult<Self> {
        let steps = records
            .iter()
            .enumerate()
            .map(|(index, record)| Step::from_record(index, record))
            .collect::<ProgramResult<Vec<_>>>()?;

        Self::new(steps)
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&Step> {
        self.steps.get(index)
    }

    pub fn steps(&self) -> &[Step] {
        &self.steps
    }

    /// Bounds of the loop starting at `start_index`
    pub fn loop_bounds(&self, start_index: usize) -> Option<&LoopBounds> {
        self.loops.get(&start_index)
    }

    /// Start index of the loop closed by the `end_loop` at `end_index`
    pub fn loop_start_for(&self, end_index: usize) -> Option<usize> {
        self.loop_ends.get(&end_index).copied()
    }
}

fn check_targets(index: usize, step: &Step, len: usize) -> ProgramResult<()> {
    let mut targets = vec![("next_step", step.jump.next), ("on_failure", step.jump.on_failure)];
    if let Some((then_step, else_step)) = step.kind.branch_targets() {
        targets.push(("then_step", then_step));
        targets.push(("else_step", else_step));
    }
    if let StepKind::Loop(loop_step) = &step.kind {
        if let Some(end_step) = loop_step.end_step.filter(|end| *end <= index) {
            return Err(ProgramError::InvalidLoopEnd { index, end_step });
        }
        targets.push(("end_step", loop_step.end_step));
    }

    for (field, target) in targets {
        if let Some(target) = target {
            if target > len {
                return Err(ProgramError::TargetOutOfRange {
                    index,
                    field,
                    target,
                    len,
                });
            }
        }
    }
    Ok(())
}

/// Pair loop starts with loop ends, innermost first
fn pair_loops(
    steps: &[Step],
) -> ProgramResult<(HashMap<usize, LoopBounds>, HashMap<usize, usize>)> {
    let mut loops = HashMap::new();
    let mut loop_ends = HashMap::new();
    let mut open: Vec<OpenLoop> = Vec::new();

    let close = |loops: &mut HashMap<usize, LoopBounds>,
                 loop_ends: &mut HashMap<usize, usize>,
                 entry: OpenLoop,
                 end_index: usize| {
        let end_index = entry.explicit_end.unwrap_or(end_index);
        loop_ends.insert(end_index, entry.start_index);
        loops.insert(
            entry.start_index,
            LoopBounds {
                label: entry.label,
                start_index: entry.start_index,
                end_index,
            },
        );
    };

    for (index, step) in steps.iter().enumerate() {
        // Loops with an explicit end whose body is already behind us
        while let Some(end) = open.last().and_then(|top| top.explicit_end) {
            if end >= index {
                break;
            }
            if let Some(entry) = open.pop() {
                close(&mut loops, &mut loop_ends, entry, end);
            }
        }

        match &step.kind {
            StepKind::Loop(loop_step) => open.push(OpenLoop {
                start_index: index,
                label: loop_step
                    .loop_id
                    .clone()
                    .unwrap_or_else(|| format!("loop_{}", index)),
                explicit_end: loop_step.end_step,
            }),
            StepKind::EndLoop(end) => {
                let Some(top) = open.last() else {
                    return Err(ProgramError::UnmatchedLoopEnd { index });
                };

                if let Some(id) = &end.loop_id {
                    if &top.label != id {
                        return Err(if open.iter().any(|l| &l.label == id) {
                            ProgramError::InterleavedLoops {
                                index,
                                loop_id: id.clone(),
                                open: top.label.clone(),
                            }
                        } else {
                            ProgramError::UnmatchedLoopEnd { index }
                        });
                    }
                }

                if let Some(entry) = open.pop() {
                    close(&mut loops, &mut loop_ends, entry, index);
                }
            }
            _ => {}
        }
    }

    while let Some(entry) = open.pop() {
        match entry.explicit_end {
            Some(end) => close(&mut loops, &mut loop_ends, entry, end),
            None => {
                return Err(ProgramError::UnclosedLoop {
                    index: entry.start_index,
                    loop_id: entry.label,
                })
            }
        }
    }

    Ok((loops, loop_ends))
}
