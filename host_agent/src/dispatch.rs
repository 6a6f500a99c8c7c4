//! Routes an event to its hook handlers, then runs guarded handlers until nothing changes.

use core::{error::Error, fmt::Write as _};

use tracing::{debug, error, info};

use crate::{
    error::ProvisionError,
    events::{Event, Hook},
    host::Host,
    provision::{self, Context, PROVISION_GUARD, Settings},
    state::{AgentState, ReadinessFlag, StatusKind},
};

/// A handler body.
pub type Handler<H> = fn(&mut Context<'_, H>, &Event) -> Result<(), ProvisionError>;

struct HookHandler<H> {
    hooks: &'static [Hook],
    name: &'static str,
    run: Handler<H>,
}

struct ReactiveHandler<H> {
    when_all: &'static [ReadinessFlag],
    name: &'static str,
    run: Handler<H>,
}

/// Which handlers run for which hook, and which run whenever their flags hold.
pub struct HandlerRegistry<H> {
    hooks: Vec<HookHandler<H>>,
    reactive: Vec<ReactiveHandler<H>>,
}

impl<H: Host> Default for HandlerRegistry<H> {
    fn default() -> Self {
        Self::new()
    }
}

impl<H: Host> HandlerRegistry<H> {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            hooks: Vec::new(),
            reactive: Vec::new(),
        }
    }

    /// Runs `run` whenever an event of one of `hooks` is dispatched.
    #[must_use]
    pub fn on(mut self, hooks: &'static [Hook], name: &'static str, run: Handler<H>) -> Self {
        self.hooks.push(HookHandler { hooks, name, run });
        self
    }

    /// Runs `run` after any event, at most once per dispatch, while all of `flags` hold.
    #[must_use]
    pub fn when_all(
        mut self,
        flags: &'static [ReadinessFlag],
        name: &'static str,
        run: Handler<H>,
    ) -> Self {
        self.reactive.push(ReactiveHandler {
            when_all: flags,
            name,
            run,
        });
        self
    }

    /// The handlers of the WSGI application lifecycle.
    #[must_use]
    pub fn standard() -> Self {
        Self::new()
            .on(
                &[Hook::Install, Hook::Upgrade],
                "system_dependencies",
                provision::system_dependencies,
            )
            .on(
                &[Hook::ConfigChanged],
                "configure_dependencies",
                provision::configure_dependencies,
            )
            .on(
                &[Hook::SourceAvailable],
                "source_available",
                provision::source_available,
            )
            .on(
                &[Hook::DatabaseRelation],
                "database_changed",
                provision::database_changed,
            )
            .on(
                &[Hook::ConsumerRelation],
                "consumer_changed",
                provision::consumer_changed,
            )
            .when_all(
                &PROVISION_GUARD,
                "start_application_service",
                provision::start_application_service,
            )
            .when_all(&[ReadinessFlag::Available], "send_port", provision::send_port)
    }

    /// Handles one event to completion.
    ///
    /// Hook handlers run first, in registration order. Guarded handlers are then
    /// evaluated repeatedly until a full round fires none of them.
    pub fn dispatch(&self, ctx: &mut Context<'_, H>, event: &Event) -> Result<(), ProvisionError> {
        let hook = event.kind.hook();
        for handler in self.hooks.iter().filter(|h| h.hooks.contains(&hook)) {
            debug!("Running hook handler {}", handler.name);
            (handler.run)(ctx, event)?;
        }

        let mut fired = vec![false; self.reactive.len()];
        loop {
            let mut progressed = false;
            for (handler, fired) in self.reactive.iter().zip(fired.iter_mut()) {
                if *fired || !ctx.state.flags.all_set(handler.when_all) {
                    continue;
                }
                debug!("Running reactive handler {}", handler.name);
                *fired = true;
                progressed = true;
                (handler.run)(ctx, event)?;
            }
            if !progressed {
                return Ok(());
            }
        }
    }
}

/// Formats an error together with its chain of sources.
fn error_chain(err: &dyn Error) -> String {
    let mut message = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        // Writing to a String never fails.
        let _ = write!(message, ": {cause}");
        source = cause.source();
    }
    message
}

/// Handles `event` with the standard handlers, recording an error status if it fails.
pub fn dispatch<H: Host>(
    host: &H,
    settings: &Settings,
    state: &mut AgentState,
    event: &Event,
) -> Result<(), ProvisionError> {
    info!("Handling {}", event.kind);
    let mut ctx = Context {
        host,
        settings,
        state,
    };
    let result = HandlerRegistry::standard().dispatch(&mut ctx, event);
    if let Err(ref err) = result {
        error!("Handling {} failed: {err}", event.kind);
        ctx.status(StatusKind::Error, error_chain(err));
    }
    result
}
