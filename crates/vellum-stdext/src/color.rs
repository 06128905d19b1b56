//! Terminal coloring
//!
//! The Vellum project uses the
//! [Colored crate](https://docs.rs/colored/latest/colored/) for terminal
//! coloring, behind the `color` Cargo feature.
//! This module implements the feature.
//!
//! The module contains a single trait [`Colorize`].
//! When the Cargo feature is enabled the trait forwards all method calls to
//! the Colored crate; when the feature is disabled the trait is a no-op.
//! In both cases downstream code just calls methods on the trait:
//!
//! ```
//! use vellum_stdext::color::Colorize;
//! println!["{}", "Hello, World".bold().bright_red()];
//! ```

#[cfg(feature = "color")]
pub type ColoredString = colored::ColoredString;

#[cfg(not(feature = "color"))]
pub type ColoredString = String;

macro_rules! colorize_impl {
    ( $( $method_name: ident, )+ ) => {
        /// Trait that provides coloring methods on strings.
        ///
        /// See the module documentation for information.
        pub trait Colorize {
            $(
                fn $method_name(self) -> ColoredString;
            )+
        }
        #[cfg(feature = "color")]
        impl Colorize for ColoredString {
            $(
                fn $method_name(self) -> ColoredString {
                    colored::Colorize::$method_name(self)
                }
            )+
        }
        #[cfg(feature = "color")]
        impl Colorize for &str {
            $(
                fn $method_name(self) -> ColoredString {
                    colored::Colorize::$method_name(self)
                }
            )+
        }
        #[cfg(not(feature = "color"))]
        impl Colorize for ColoredString {
            $(
                fn $method_name(self) -> ColoredString {
                    self
                }
            )+
        }
        #[cfg(not(feature = "color"))]
        impl Colorize for &str {
            $(
                fn $method_name(self) -> ColoredString {
                    self.into()
                }
            )+
        }
    };
}

colorize_impl!(
    bold,
    bright_cyan,
    bright_blue,
    bright_red,
    bright_yellow,
    italic,
);
