//! Procedural macros for testing terelina-esp32.
//!
//! - `#[esp32_test]` marks a host unit test and captures its log output.
//! - `#[tap_test]` registers a test with the on-device TAP harness.

use proc_macro::TokenStream;
use quote::quote;
use syn::{parse_macro_input, Expr, ExprLit, ItemFn, Lit, Meta, ReturnType};

/// Mark a function as a host unit test.
///
/// Expands to `#[test]` and installs `env_logger` in test mode first, so the
/// `log` output of the code under test shows up next to a failing assertion.
///
/// # Example
///
/// ```ignore
/// use terelina_esp32_macros::esp32_test;
///
/// #[esp32_test]
/// fn portal_name_is_stable() {
///     let id = DeviceIdentity::from_efuse_mac([0xA2, 0x3F, 0, 0, 0, 0]);
///     assert_eq!(id.portal_name("Terelina"), "Terelina-3FA2");
/// }
/// ```
#[proc_macro_attribute]
pub fn esp32_test(attr: TokenStream, item: TokenStream) -> TokenStream {
    if !attr.is_empty() {
        panic!("esp32_test: takes no arguments, use #[should_panic] alongside it instead");
    }

    let input_fn = parse_macro_input!(item as ItemFn);

    let fn_name = &input_fn.sig.ident;
    let fn_block = &input_fn.block;
    let fn_vis = &input_fn.vis;
    let fn_attrs = &input_fn.attrs;
    let fn_output = &input_fn.sig.output;

    let expanded = quote! {
        #[test]
        #(#fn_attrs)*
        #fn_vis fn #fn_name() #fn_output {
            let _ = ::env_logger::builder()
                .is_test(true)
                .filter_level(::log::LevelFilter::Debug)
                .try_init();
            #fn_block
        }
    };

    TokenStream::from(expanded)
}

/// Mark a function as a TAP test.
///
/// The function will be registered with the test collector and run when
/// the test binary executes. Tests can either:
/// - Return nothing (panics indicate failure)
/// - Return `Result<(), E>` where `E: Error` (Err indicates failure)
///
/// # Attributes
///
/// - `#[tap_test]` - Regular test
/// - `#[tap_test(should_panic)]` - Test that should panic
/// - `#[tap_test(should_panic = "expected message")]` - Test that should panic with specific message
///
/// # Example
///
/// ```ignore
/// use terelina_esp32_macros::tap_test;
///
/// #[tap_test]
/// fn efuse_mac_is_stable() {
///     assert_eq!(read_efuse_mac().unwrap(), read_efuse_mac().unwrap());
/// }
///
/// #[tap_test]
/// fn nvs_round_trip() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
///     let mut store = NvsCredentialStore::open()?;
///     store.save(&Credentials::new("Office", "secret123")?)?;
///     Ok(())
/// }
///
/// #[tap_test(should_panic = "already taken")]
/// fn modem_taken_twice() {
///     take_modem();
///     take_modem();
/// }
/// ```
#[proc_macro_attribute]
pub fn tap_test(attr: TokenStream, item: TokenStream) -> TokenStream {
    let input_fn = parse_macro_input!(item as ItemFn);
    let should_panic = match parse_should_panic(attr) {
        Ok(should_panic) => should_panic,
        Err(e) => return e.to_compile_error().into(),
    };

    let fn_name = &input_fn.sig.ident;
    let fn_name_str = fn_name.to_string();
    let returns_result = matches!(input_fn.sig.output, ReturnType::Type(_, _));

    let register_call = match should_panic {
        ShouldPanic::No if returns_result => quote! {
            runner.run(#fn_name_str, #fn_name);
        },
        ShouldPanic::No => quote! {
            runner.run_assert(#fn_name_str, #fn_name);
        },
        ShouldPanic::Yes => quote! {
            runner.run_should_panic(#fn_name_str, #fn_name, None);
        },
        ShouldPanic::WithMessage(msg) => quote! {
            runner.run_should_panic(#fn_name_str, #fn_name, Some(#msg));
        },
    };

    // The function itself stays as written; registration goes through inventory
    let expanded = quote! {
        #input_fn

        ::inventory::submit! {
            ::terelina_esp32::testing::TapTestEntry::new(
                ::core::module_path!(),
                #fn_name_str,
                |runner: &mut ::terelina_esp32::testing::TestRunner| {
                    #register_call
                }
            )
        }
    };

    TokenStream::from(expanded)
}

enum ShouldPanic {
    No,
    Yes,
    WithMessage(String),
}

/// Accepts nothing, `should_panic`, or `should_panic = "message"`.
fn parse_should_panic(attr: TokenStream) -> syn::Result<ShouldPanic> {
    if attr.is_empty() {
        return Ok(ShouldPanic::No);
    }

    let meta: Meta = syn::parse(attr)?;
    if !meta.path().is_ident("should_panic") {
        return Err(syn::Error::new_spanned(
            meta.path(),
            "tap_test: expected `should_panic` or `should_panic = \"message\"`",
        ));
    }

    match meta {
        Meta::Path(_) => Ok(ShouldPanic::Yes),
        Meta::NameValue(nv) => match nv.value {
            Expr::Lit(ExprLit {
                lit: Lit::Str(s), ..
            }) => Ok(ShouldPanic::WithMessage(s.value())),
            other => Err(syn::Error::new_spanned(
                other,
                "tap_test: should_panic expects a string literal",
            )),
        },
        Meta::List(list) => Err(syn::Error::new_spanned(
            list,
            "tap_test: use `should_panic = \"message\"`, not a list",
        )),
    }
}
