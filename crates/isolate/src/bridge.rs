//! Generated guest-side shims. These scripts are part of the system's
//! observable contract: `require` semantics, the `net`/`fetch` façade, the
//! platform KV surface, and the Python/Ruby trampolines all live here as
//! source text evaluated into each context.

use indexmap::IndexMap;
use value::HostValue;

use crate::convert::{
    python_literal,
    ruby_literal,
};

/// Host binding names. Engines expose each as a global callable (for Ruby,
/// a callable global variable of the same name).
pub const NET_BINDING: &str = "__faas_net_http__";
pub const DEP_SOURCE_BINDING: &str = "__faas_dep_source__";
pub const KV_GET_BINDING: &str = "__faas_kv_get__";
pub const KV_PUT_BINDING: &str = "__faas_kv_put__";
pub const KV_DELETE_BINDING: &str = "__faas_kv_delete__";
pub const KV_KEYS_BINDING: &str = "__faas_kv_keys__";

/// Name of the generated zero-argument trampoline binding.
pub const TRAMPOLINE_NAME: &str = "__faas_invoke__";
/// Name of the JS helper that attaches the platform to an event object.
pub const PREPARE_EVENT_NAME: &str = "__faas_prepare_event__";

/// CommonJS-style `require` over the in-memory dependency map: synchronous,
/// deterministic per-module cache, modules constructed with
/// `(exports, module, require)`, and `Module not found: <name>` for absent
/// names. No filesystem or network resolution.
pub const JS_REQUIRE_SHIM: &str = r#"(function () {
  var cache = Object.create(null);
  globalThis.require = function require(name) {
    name = String(name);
    if (name in cache) {
      return cache[name].exports;
    }
    var source = __faas_dep_source__(name);
    if (source === null || source === undefined) {
      throw new Error('Module not found: ' + name);
    }
    var module = { exports: {} };
    cache[name] = module;
    var factory = new Function('exports', 'module', 'require', source);
    factory(module.exports, module, globalThis.require);
    return module.exports;
  };
})();
"#;

/// `globalThis.net` plus a `fetch` façade over the host `net` binding.
pub const JS_NET_SHIM: &str = r#"(function () {
  var hostHttp = globalThis.__faas_net_http__;
  var net = {
    http: function (method, url, body, headers) {
      return hostHttp(
        String(method),
        String(url),
        body === undefined ? null : body,
        headers === undefined || headers === null ? {} : headers
      );
    },
    get: function (url, headers) { return net.http('GET', url, null, headers); },
    post: function (url, body, headers) { return net.http('POST', url, body, headers); },
  };
  globalThis.net = net;
  globalThis.fetch = function (input, init) {
    init = init || {};
    var response;
    try {
      response = net.http(
        (init.method || 'GET').toUpperCase(),
        String(input),
        init.body === undefined ? null : init.body,
        init.headers || {}
      );
    } catch (e) {
      return Promise.reject(e);
    }
    var lowered = {};
    for (var name in response.headers) {
      lowered[name.toLowerCase()] = response.headers[name];
    }
    return Promise.resolve({
      ok: response.status >= 200 && response.status < 300,
      status: response.status,
      url: String(input),
      headers: {
        get: function (name) {
          var v = lowered[String(name).toLowerCase()];
          return v === undefined ? null : v;
        },
        has: function (name) {
          return lowered[String(name).toLowerCase()] !== undefined;
        },
      },
      text: function () { return Promise.resolve(response.body); },
      json: function () {
        try {
          return Promise.resolve(JSON.parse(response.body));
        } catch (e) {
          return Promise.reject(e);
        }
      },
    });
  };
})();
"#;

/// The platform handle surface plus the event-preparation helper that
/// attaches it to the event object before the entry runs.
pub const JS_PLATFORM_SHIM: &str = r#"(function () {
  var kv = {
    get: function (key) { return __faas_kv_get__(String(key)); },
    put: function (key, value) { return __faas_kv_put__(String(key), String(value)); },
    delete: function (key) { return __faas_kv_delete__(String(key)); },
    keys: function () { return __faas_kv_keys__(); },
  };
  var sql = {
    query: function () { throw new Error('sql resources are not implemented'); },
  };
  globalThis.__faas_platform__ = { kv: kv, sql: sql };
  globalThis.__faas_prepare_event__ = function (event) {
    event.platform = globalThis.__faas_platform__;
    return event;
  };
})();
"#;

/// Python `net` object mirroring the JS surface.
pub const PYTHON_NET_SHIM: &str = r#"class __FaasNet:
    def http(self, method, url, body=None, headers=None):
        return __faas_net_http__(method, url, body, headers if headers is not None else {})

    def get(self, url, headers=None):
        return self.http('GET', url, None, headers)

    def post(self, url, body=None, headers=None):
        return self.http('POST', url, body, headers)

net = __FaasNet()
"#;

/// Ruby `$net` singleton and top-level `net` method.
pub const RUBY_NET_SHIM: &str = r#"class FaasNet
  def http(method, url, body = nil, headers = {})
    $__faas_net_http__.call(method, url, body, headers)
  end

  def get(url, headers = {})
    http('GET', url, nil, headers)
  end

  def post(url, body = nil, headers = {})
    http('POST', url, body, headers)
  end
end

$net = FaasNet.new

def net
  $net
end
"#;

/// Install each dependency as an importable Python module: an ephemeral
/// module object whose dict the dependency source executes into, registered
/// in `sys.modules` so plain `import name` works.
pub fn python_dependency_preamble(dependencies: &IndexMap<String, String>) -> String {
    let mut out = String::from(
        "import sys\nimport types\n\n\
         def __faas_install_module__(name, source):\n\
         \x20   module = types.ModuleType(name)\n\
         \x20   exec(compile(source, name, 'exec'), module.__dict__)\n\
         \x20   sys.modules[name] = module\n\n",
    );
    for (name, source) in dependencies {
        out.push_str(&format!(
            "__faas_install_module__({}, {})\n",
            python_literal(&HostValue::String(name.clone())),
            python_literal(&HostValue::String(source.clone())),
        ));
    }
    out
}

/// Zero-argument Python trampoline calling the handler with a pre-baked
/// event literal, so no live host references cross the boundary.
pub fn python_trampoline(function_name: &str, event: &HostValue) -> String {
    format!(
        "def {TRAMPOLINE_NAME}():\n    return {function_name}({})\n",
        python_literal(event),
    )
}

/// The analogous Ruby trampoline lambda.
pub fn ruby_trampoline(function_name: &str, event: &HostValue) -> String {
    format!(
        "${TRAMPOLINE_NAME} = lambda do\n  {function_name}({})\nend\n",
        ruby_literal(event),
    )
}
