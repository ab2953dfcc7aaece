// src/module/capabilities.rs

use std::fmt;

use crate::config::ModuleConfig;
use crate::transition::Transition;

/// Which transitions a module takes part in.
///
/// `BeginJob` and `EndJob` are always delivered; every other transition is
/// gated by exactly one flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Capabilities {
    pub events: bool,
    pub global_runs: bool,
    pub global_lumis: bool,
    pub stream_runs: bool,
    pub stream_lumis: bool,
    pub process_blocks: bool,
    pub input_files: bool,
    pub streams: bool,
    /// The module has an asynchronous acquire step before its event callback.
    pub acquire: bool,
    /// The module writes lumis and runs after their global end.
    pub output: bool,
}

impl Default for Capabilities {
    fn default() -> Self {
        Self::events_only()
    }
}

impl Capabilities {
    pub const fn none() -> Self {
        Self {
            events: false,
            global_runs: false,
            global_lumis: false,
            stream_runs: false,
            stream_lumis: false,
            process_blocks: false,
            input_files: false,
            streams: false,
            acquire: false,
            output: false,
        }
    }

    /// Every transition except the acquire step.
    pub const fn all() -> Self {
        Self {
            events: true,
            global_runs: true,
            global_lumis: true,
            stream_runs: true,
            stream_lumis: true,
            process_blocks: true,
            input_files: true,
            streams: true,
            acquire: false,
            output: true,
        }
    }

    pub const fn events_only() -> Self {
        Self {
            events: true,
            ..Self::none()
        }
    }

    pub fn wants(&self, t: Transition) -> bool {
        match t {
            Transition::BeginJob | Transition::EndJob => true,
            Transition::BeginStream | Transition::EndStream => self.streams,
            Transition::BeginProcessBlock | Transition::EndProcessBlock => self.process_blocks,
            Transition::OpenInputFile | Transition::CloseInputFile => self.input_files,
            Transition::GlobalBeginRun | Transition::GlobalEndRun => self.global_runs,
            Transition::StreamBeginRun | Transition::StreamEndRun => self.stream_runs,
            Transition::GlobalBeginLumi | Transition::GlobalEndLumi => self.global_lumis,
            Transition::StreamBeginLumi | Transition::StreamEndLumi => self.stream_lumis,
            Transition::Event => self.events,
            Transition::WriteLumi | Transition::WriteRun => self.output,
        }
    }

    /// Turn on the flag that gates `t`.
    pub fn enable(mut self, t: Transition) -> Self {
        match t {
            Transition::BeginJob | Transition::EndJob => {}
            Transition::BeginStream | Transition::EndStream => self.streams = true,
            Transition::BeginProcessBlock | Transition::EndProcessBlock => {
                self.process_blocks = true
            }
            Transition::OpenInputFile | Transition::CloseInputFile => self.input_files = true,
            Transition::GlobalBeginRun | Transition::GlobalEndRun => self.global_runs = true,
            Transition::StreamBeginRun | Transition::StreamEndRun => self.stream_runs = true,
            Transition::GlobalBeginLumi | Transition::GlobalEndLumi => self.global_lumis = true,
            Transition::StreamBeginLumi | Transition::StreamEndLumi => self.stream_lumis = true,
            Transition::Event => self.events = true,
            Transition::WriteLumi | Transition::WriteRun => self.output = true,
        }
        self
    }

    pub fn wanted(&self) -> impl Iterator<Item = Transition> + '_ {
        Transition::ALL.into_iter().filter(|t| self.wants(*t))
    }

    /// Apply the flags a `[[module]]` entry sets explicitly.
    pub fn with_overrides(mut self, cfg: &ModuleConfig) -> Self {
        let overrides = [
            (&mut self.events, cfg.events),
            (&mut self.global_runs, cfg.global_runs),
            (&mut self.global_lumis, cfg.global_lumis),
            (&mut self.stream_runs, cfg.stream_runs),
            (&mut self.stream_lumis, cfg.stream_lumis),
            (&mut self.process_blocks, cfg.process_blocks),
            (&mut self.input_files, cfg.input_files),
            (&mut self.streams, cfg.streams),
            (&mut self.acquire, cfg.acquire),
            (&mut self.output, cfg.output),
        ];
        for (flag, value) in overrides {
            if let Some(v) = value {
                *flag = v;
            }
        }
        self
    }
}

impl fmt::Display for Capabilities {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let flags = [
            ("events", self.events),
            ("global_runs", self.global_runs),
            ("global_lumis", self.global_lumis),
            ("stream_runs", self.stream_runs),
            ("stream_lumis", self.stream_lumis),
            ("process_blocks", self.process_blocks),
            ("input_files", self.input_files),
            ("streams", self.streams),
            ("acquire", self.acquire),
            ("output", self.output),
        ];
        let set: Vec<&str> = flags.iter().filter(|(_, on)| *on).map(|(n, _)| *n).collect();
        if set.is_empty() {
            f.write_str("job only")
        } else {
            f.write_str(&set.join(","))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn events_only_skips_run_and_lumi_transitions() {
        let caps = Capabilities::events_only();
        assert!(caps.wants(Transition::Event));
        assert!(caps.wants(Transition::BeginJob));
        assert!(!caps.wants(Transition::GlobalBeginRun));
        assert!(!caps.wants(Transition::StreamBeginLumi));
        assert!(!caps.wants(Transition::WriteLumi));
    }

    #[test]
    fn overrides_only_touch_explicit_flags() {
        let cfg = ModuleConfig {
            label: "m".into(),
            kind: "counter".into(),
            global_runs: Some(false),
            ..ModuleConfig::default()
        };
        let caps = Capabilities::all().with_overrides(&cfg);
        assert!(!caps.global_runs);
        assert!(caps.global_lumis);
        assert!(caps.events);
    }
}
