//! Formatting layer construction.
//!
//! Each output format has its own concrete layer type, so these are macros
//! rather than functions returning a common type.

/// Text layer (`pretty` or `compact`) with the display toggles applied
macro_rules! text_layer {
    ($display:expr, $writer:expr, $style:ident) => {
        tracing_subscriber::fmt::layer()
            .with_writer($writer)
            .with_target($display.target)
            .with_file($display.source)
            .with_line_number($display.source)
            .with_thread_ids($display.thread_ids)
            .with_thread_names($display.thread_names)
            .with_ansi($display.colors)
            .$style()
    };
}

/// JSON layer with the display toggles applied
macro_rules! json_layer {
    ($display:expr, $writer:expr) => {
        tracing_subscriber::fmt::layer()
            .with_writer($writer)
            .with_target($display.target)
            .with_file($display.source)
            .with_line_number($display.source)
            .with_thread_ids($display.thread_ids)
            .with_thread_names($display.thread_names)
            .json()
            .with_current_span(true)
            .with_span_list($display.span_list)
            .flatten_event($display.flatten)
    };
}

/// Install `$layer` over `$subscriber`, dropping timestamps when disabled.
macro_rules! install {
    ($subscriber:expr, $layer:expr, $time:expr) => {{
        let layer = $layer;
        if $time {
            $subscriber.with(layer).try_init()
        } else {
            $subscriber.with(layer.without_time()).try_init()
        }
    }};
}

pub(super) use {install, json_layer, text_layer};
