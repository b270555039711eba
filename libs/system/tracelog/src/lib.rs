// This file is part of Nitrogen.
//
// Nitrogen is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// Nitrogen is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License
// along with Nitrogen.  If not, see <http://www.gnu.org/licenses/>.
use anyhow::Result;
use structopt::StructOpt;
use tracing_subscriber::{
    fmt::{format::DefaultFields, FormattedFields},
    prelude::*,
    registry::Registry,
    EnvFilter,
};

#[derive(Clone, Debug, StructOpt)]
pub struct TraceLogOpts {
    /// Capture a chrome-format execution trace.
    #[structopt(short = "T", long)]
    trace: bool,

    /// Log filter directives; falls back to RUST_LOG, then to info.
    #[structopt(long)]
    log_filter: Option<String>,
}

impl TraceLogOpts {
    pub fn trace_enabled(&self) -> bool {
        self.trace
    }

    fn filter(&self) -> Result<EnvFilter> {
        Ok(match &self.log_filter {
            Some(directives) => EnvFilter::try_new(directives)?,
            None => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        })
    }
}

/// The installed global subscriber. Keep it alive for as long as the
/// chrome trace should keep recording.
pub struct TraceLog {
    _chrome_guard: Option<tracing_chrome::FlushGuard>,
}

impl TraceLog {
    /// Install the global subscriber and route `log` records into it. May
    /// only be called once per process.
    pub fn init(opts: &TraceLogOpts) -> Result<Self> {
        tracing_log::LogTracer::init()?;

        let (chrome_layer, guard) = if opts.trace {
            let (chrome_layer, guard) = tracing_chrome::ChromeLayerBuilder::new()
                .name_fn(Box::new(|event_or_span| match event_or_span {
                    tracing_chrome::EventOrSpan::Event(event) => event.metadata().name().into(),
                    tracing_chrome::EventOrSpan::Span(span) => {
                        if let Some(fields) =
                            span.extensions().get::<FormattedFields<DefaultFields>>()
                        {
                            format!("{}: {}", span.metadata().name(), fields.fields.as_str())
                        } else {
                            span.metadata().name().into()
                        }
                    }
                }))
                .build();
            (Some(chrome_layer), Some(guard))
        } else {
            (None, None)
        };

        let subscriber = Registry::default()
            .with(opts.filter()?)
            .with(tracing_error::ErrorLayer::default())
            .with(tracing_subscriber::fmt::Layer::default())
            .with(chrome_layer);
        tracing::subscriber::set_global_default(subscriber)?;

        Ok(Self {
            _chrome_guard: guard,
        })
    }
}
